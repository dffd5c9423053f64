//! Typed experiment descriptors.
//!
//! These are what an experiment-description parser hands to the engine. They
//! are plain serde types so that a descriptor can also be loaded from JSON.
//! Every name in a descriptor is resolved once, when the session is built;
//! resolution failures are reported as [`ConfigurationError`].

use crate::buffer::BufferCapacity;
use crate::source::{ChannelKind, RateStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A complete experiment: buffers, sensor inputs and the analysis graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentDescriptor {
    #[serde(default)]
    pub title: String,
    pub buffers: Vec<BufferDescriptor>,
    #[serde(default)]
    pub inputs: Vec<InputDescriptor>,
    #[serde(default)]
    pub analysis: GraphDescriptor,
}

impl ExperimentDescriptor {
    /// Parse an experiment descriptor from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Declaration of one shared buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferDescriptor {
    pub name: String,
    #[serde(default)]
    pub capacity: BufferCapacity,
    /// Static buffers hold fixed calibration/config values
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Initial contents
    #[serde(default)]
    pub seed: Vec<f64>,
    /// Value reported by `last()` while the buffer is empty
    #[serde(default)]
    pub default: Option<f64>,
}

impl BufferDescriptor {
    pub fn new(name: impl Into<String>, capacity: BufferCapacity) -> Self {
        Self {
            name: name.into(),
            capacity,
            is_static: false,
            seed: Vec::new(),
            default: None,
        }
    }

    /// A static buffer holding the given values.
    pub fn constant(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            capacity: BufferCapacity::Bounded(values.len().max(1)),
            is_static: true,
            seed: values,
            default: None,
        }
    }
}

/// Binding of one source to output buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Source id registered in the sensor hub
    pub source: String,
    /// Requested output period in seconds (0 = native rate)
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub strategy: RateStrategy,
    #[serde(default = "default_stride")]
    pub stride: u32,
    /// Average accumulated samples (false: keep the latest raw value)
    #[serde(default = "default_true")]
    pub average: bool,
    /// Buffer receiving experiment time
    #[serde(default)]
    pub time: Option<String>,
    /// One entry per source channel, in emission order
    #[serde(default)]
    pub channels: Vec<ChannelDescriptor>,
}

/// Output binding of a single source channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub buffer: Option<String>,
}

/// Declaration of the analysis graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDescriptor {
    /// Seconds between iterations
    #[serde(default)]
    pub sleep: Option<f64>,
    /// Buffer whose last value overrides `sleep`
    #[serde(default)]
    pub dynamic_sleep: Option<String>,
    /// Buffer that must be full before an iteration runs
    #[serde(default)]
    pub require_fill: Option<String>,
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
}

/// Declaration of one analysis module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Operator key, e.g. `add` or `fft`
    pub operator: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<ModuleInputDescriptor>,
    /// `None` entries are outputs the experiment does not use
    #[serde(default)]
    pub outputs: Vec<Option<ModuleOutputDescriptor>>,
}

impl ModuleDescriptor {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            attributes: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn input(mut self, input: ModuleInputDescriptor) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, buffer: &str, clear: bool) -> Self {
        self.outputs.push(Some(ModuleOutputDescriptor {
            buffer: buffer.to_string(),
            clear,
        }));
        self
    }

    pub fn unused_output(mut self) -> Self {
        self.outputs.push(None);
        self
    }
}

/// One module input slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleInputDescriptor {
    Buffer {
        name: String,
        /// Empty the buffer after the module has read it
        #[serde(default)]
        clear: bool,
    },
    Value(f64),
    Empty,
}

impl ModuleInputDescriptor {
    pub fn buffer(name: &str) -> Self {
        Self::Buffer {
            name: name.to_string(),
            clear: false,
        }
    }

    pub fn consumed(name: &str) -> Self {
        Self::Buffer {
            name: name.to_string(),
            clear: true,
        }
    }
}

/// One module output slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutputDescriptor {
    pub buffer: String,
    /// Replace the buffer contents (true) or append (false)
    #[serde(default = "default_true")]
    pub clear: bool,
}

fn default_stride() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Errors raised while turning descriptors into a runnable session.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Buffer '{0}' is declared more than once")]
    DuplicateBuffer(String),

    #[error("Unknown buffer '{0}'")]
    UnknownBuffer(String),

    #[error("Unknown analysis operator '{0}'")]
    UnknownOperator(String),

    #[error("Operator '{operator}': {detail}")]
    Arity { operator: String, detail: String },

    #[error("Operator '{operator}': invalid attribute '{attribute}': {detail}")]
    InvalidAttribute {
        operator: String,
        attribute: String,
        detail: String,
    },

    #[error("Static buffer '{0}' cannot be written at runtime")]
    StaticTarget(String),

    #[error("Input for source '{source_id}': {detail}")]
    InvalidInput { source_id: String, detail: String },

    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    #[error("Source '{0}' is registered more than once")]
    DuplicateSource(String),

    #[error("Analysis graph: {0}")]
    InvalidGraph(String),

    #[error("Could not create spill storage for buffer '{buffer}': {error}")]
    Spill {
        buffer: String,
        #[source]
        error: std::io::Error,
    },
}
