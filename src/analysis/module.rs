//! A module: one operator bound to its input and output buffers.

use crate::analysis::operator::Operator;
use crate::buffer::{BufferHandle, BufferTable};
use crate::descriptor::{ConfigurationError, ModuleDescriptor, ModuleInputDescriptor};

/// Resolved input slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModuleInput {
    /// Read the whole buffer, optionally emptying it after the run
    Buffer { handle: BufferHandle, clear: bool },
    Literal(f64),
    Empty,
}

/// Resolved output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleOutput {
    pub handle: BufferHandle,
    /// Replace the contents (true) or append (false)
    pub clear: bool,
}

#[derive(Debug, Clone)]
pub struct Module {
    operator: Operator,
    inputs: Vec<ModuleInput>,
    outputs: Vec<Option<ModuleOutput>>,
}

impl Module {
    pub fn from_descriptor(
        descriptor: &ModuleDescriptor,
        buffers: &BufferTable,
    ) -> Result<Self, ConfigurationError> {
        let operator = Operator::from_descriptor(descriptor)?;

        let inputs = descriptor
            .inputs
            .iter()
            .map(|input| {
                Ok(match input {
                    ModuleInputDescriptor::Buffer { name, clear } => ModuleInput::Buffer {
                        handle: buffers.handle(name)?,
                        clear: *clear,
                    },
                    ModuleInputDescriptor::Value(v) => ModuleInput::Literal(*v),
                    ModuleInputDescriptor::Empty => ModuleInput::Empty,
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        let outputs = descriptor
            .outputs
            .iter()
            .map(|output| {
                output
                    .as_ref()
                    .map(|o| {
                        Ok(ModuleOutput {
                            handle: buffers.writable_handle(&o.buffer)?,
                            clear: o.clear,
                        })
                    })
                    .transpose()
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        Ok(Self {
            operator,
            inputs,
            outputs,
        })
    }

    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    /// Gather inputs, run the operator, write outputs, then consume inputs
    /// flagged `clear`. Returns the number of failed writes.
    pub fn execute(&self, buffers: &BufferTable) -> usize {
        let gathered: Vec<Option<Vec<f64>>> =
            self.inputs.iter().map(|input| gather(input, buffers)).collect();

        let results = self.operator.apply(&gathered);

        let mut failures = 0;
        for (output, result) in self.outputs.iter().zip(results) {
            let (Some(output), Some(values)) = (output, result) else {
                continue;
            };
            let buffer = buffers.get(output.handle);
            let written = if output.clear {
                buffer.replace(&values)
            } else {
                buffer.append_all(&values)
            };
            if let Err(e) = written {
                tracing::error!(operator = ?self.operator, "Module output failed: {}", e);
                failures += 1;
            }
        }

        for input in &self.inputs {
            if let ModuleInput::Buffer {
                handle,
                clear: true,
            } = input
            {
                buffers.get(*handle).clear();
            }
        }
        failures
    }
}

fn gather(input: &ModuleInput, buffers: &BufferTable) -> Option<Vec<f64>> {
    match input {
        ModuleInput::Buffer { handle, .. } => {
            let buffer = buffers.get(*handle);
            let values = buffer.to_array();
            if values.is_empty() {
                // An empty buffer still reads as its default value, if it has one.
                Some(buffer.last().map(|d| vec![d]).unwrap_or_default())
            } else {
                Some(values)
            }
        }
        ModuleInput::Literal(v) => Some(vec![*v]),
        ModuleInput::Empty => None,
    }
}
