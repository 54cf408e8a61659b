//! Render settings and their documented defaults.
//!
//! Submissions carry a partial JSON object; [`RenderSettings::merged`] fills
//! every missing field from [`RenderSettings::default`]. The merged record
//! is what gets persisted next to the task's images and what the renderer
//! invocation is built from.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of checkpoint images saved over the course of one render.
pub const NUM_PROGRESS_IMAGES: u32 = 10;

/// Number of progress lines the renderer prints over one render.
pub const NUM_PROGRESS_LINES: u32 = 100;

/// How the output image is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitMode {
    Random,
    Image,
}

/// Pooling layer used by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pooling {
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimizer {
    Adam,
    Lbfgs,
}

impl InitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitMode::Random => "random",
            InitMode::Image => "image",
        }
    }
}

impl Pooling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pooling::Max => "max",
            Pooling::Avg => "avg",
        }
    }
}

impl Optimizer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Optimizer::Adam => "adam",
            Optimizer::Lbfgs => "lbfgs",
        }
    }
}

/// Full settings record for one render.
///
/// Serialized in camelCase, which is also the on-disk format of
/// `<id>_settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    pub image_size: u32,
    pub num_iterations: u32,
    pub content_weight: f64,
    pub style_weight: f64,
    pub tv_weight: f64,
    pub init: InitMode,
    pub normalize_gradients: bool,
    pub content_layers: Vec<String>,
    pub style_layers: Vec<String>,
    pub style_scale: f64,
    pub pooling: Pooling,
    pub optimizer: Optimizer,
    pub learning_rate: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            image_size: 256,
            num_iterations: 1000,
            content_weight: 5.0,
            style_weight: 100.0,
            tv_weight: 0.001,
            init: InitMode::Random,
            normalize_gradients: false,
            content_layers: vec!["relu4_2".to_string()],
            style_layers: ["relu1_1", "relu2_1", "relu3_1", "relu4_1", "relu5_1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            style_scale: 1.0,
            pooling: Pooling::Max,
            optimizer: Optimizer::Adam,
            learning_rate: 10.0,
        }
    }
}

impl RenderSettings {
    /// Merge raw submitted settings over the defaults.
    ///
    /// `null` means "all defaults". Anything other than an object, a field
    /// of the wrong type, or values the renderer cannot run with are
    /// rejected as [`Error::InvalidSettings`].
    pub fn merged(raw: serde_json::Value) -> Result<Self> {
        let settings = match raw {
            serde_json::Value::Null => Self::default(),
            serde_json::Value::Object(_) => serde_json::from_value(raw)
                .map_err(|e| Error::InvalidSettings(e.to_string()))?,
            other => {
                return Err(Error::InvalidSettings(format!(
                    "expected an object, got {}",
                    other
                )))
            }
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check the constraints the renderer relies on.
    pub fn validate(&self) -> Result<()> {
        if self.num_iterations == 0 {
            return Err(Error::InvalidSettings(
                "numIterations must be at least 1".to_string(),
            ));
        }
        if self.image_size == 0 {
            return Err(Error::InvalidSettings(
                "imageSize must be at least 1".to_string(),
            ));
        }
        if self.content_layers.is_empty() || self.style_layers.is_empty() {
            return Err(Error::InvalidSettings(
                "contentLayers and styleLayers must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Iterations between progress lines, never below 1.
    pub fn print_interval(&self) -> u32 {
        (self.num_iterations / NUM_PROGRESS_LINES).max(1)
    }

    /// Iterations between checkpoint images, never below 1.
    pub fn save_interval(&self) -> u32 {
        (self.num_iterations / NUM_PROGRESS_IMAGES).max(1)
    }

    /// Checkpoint iterations strictly before `iter`: `save, 2*save, ...`.
    pub fn checkpoints_before(&self, iter: u32) -> Vec<u32> {
        let step = self.save_interval();
        (1..)
            .map(|k| k * step)
            .take_while(|&i| i < iter)
            .collect()
    }

    /// Checkpoint iterations up to and including `iter`, excluding the
    /// final iteration, which has no checkpoint.
    pub fn checkpoints_through(&self, iter: u32) -> Vec<u32> {
        self.checkpoints_before(iter.saturating_add(1).min(self.num_iterations))
    }
}
