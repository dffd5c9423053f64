//! The closed set of analysis operators.
//!
//! Each operator is parsed once from its descriptor (key plus attributes) and
//! checked against its input/output signature, so a running graph never meets
//! an unknown operator or a wrong slot count.

use crate::analysis::ops;
use crate::descriptor::{ConfigurationError, ModuleDescriptor};
use serde_json::Value;
use std::collections::BTreeMap;

/// Rounding used by the `round` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    Nearest,
    Floor,
    Ceil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrigFunction {
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Asin,
    Acos,
    Atan,
}

impl TrigFunction {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "sinh" => Self::Sinh,
            "cosh" => Self::Cosh,
            "tanh" => Self::Tanh,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            _ => return None,
        })
    }

    fn eval(self, v: f64, degrees: bool) -> f64 {
        let input = if degrees && self.takes_angle() {
            v.to_radians()
        } else {
            v
        };
        let out = match self {
            Self::Sin => input.sin(),
            Self::Cos => input.cos(),
            Self::Tan => input.tan(),
            Self::Sinh => input.sinh(),
            Self::Cosh => input.cosh(),
            Self::Tanh => input.tanh(),
            Self::Asin => input.asin(),
            Self::Acos => input.acos(),
            Self::Atan => input.atan(),
        };
        if degrees && self.returns_angle() {
            out.to_degrees()
        } else {
            out
        }
    }

    fn takes_angle(self) -> bool {
        matches!(self, Self::Sin | Self::Cos | Self::Tan)
    }

    fn returns_angle(self) -> bool {
        matches!(self, Self::Asin | Self::Acos | Self::Atan)
    }
}

/// An analysis operator with its parsed attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Gcd,
    Lcm,
    Abs,
    Log,
    Round(RoundMode),
    Trig { function: TrigFunction, degrees: bool },
    Atan2 { degrees: bool },
    Max,
    Min,
    Threshold { threshold: f64, falling: bool },
    Append,
    Fft,
    Autocorrelation { min_x: f64, max_x: f64 },
    Crosscorrelation,
    Differentiate,
    Integrate,
    Ramp,
    Const,
    Binning,
    If { less: bool, equal: bool, greater: bool },
    Average,
    Count,
    First,
    Subrange,
    RangeFilter,
    Sort { descending: bool },
    GaussSmooth { sigma: f64 },
    Match,
}

/// How many output slots an operator offers for a given input count.
#[derive(Debug, Clone, Copy)]
enum Outputs {
    Fixed(usize),
    PerInput,
    /// One per input after the leading parameters
    PerInputAfter(usize),
    /// One per group of inputs
    PerGroup(usize),
}

#[derive(Debug, Clone, Copy)]
struct Signature {
    min_inputs: usize,
    max_inputs: Option<usize>,
    outputs: Outputs,
}

impl Signature {
    const fn new(min_inputs: usize, max_inputs: Option<usize>, outputs: Outputs) -> Self {
        Self {
            min_inputs,
            max_inputs,
            outputs,
        }
    }

    fn max_outputs(&self, inputs: usize) -> usize {
        match self.outputs {
            Outputs::Fixed(n) => n,
            Outputs::PerInput => inputs,
            Outputs::PerInputAfter(skip) => inputs.saturating_sub(skip),
            Outputs::PerGroup(size) => (inputs + size - 1) / size,
        }
    }
}

/// Attribute reader that reports errors against one operator.
struct Attributes<'a> {
    operator: &'a str,
    values: &'a BTreeMap<String, Value>,
}

impl Attributes<'_> {
    fn invalid(&self, attribute: &str, detail: &str) -> ConfigurationError {
        ConfigurationError::InvalidAttribute {
            operator: self.operator.to_string(),
            attribute: attribute.to_string(),
            detail: detail.to_string(),
        }
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigurationError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
            Some(Value::String(s)) => match s.as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.invalid(key, "expected a boolean")),
            },
            Some(_) => Err(self.invalid(key, "expected a boolean")),
        }
    }

    fn number(&self, key: &str, default: f64) -> Result<f64, ConfigurationError> {
        match self.values.get(key) {
            None => Ok(default),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| self.invalid(key, "expected a number")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| self.invalid(key, "expected a number")),
            Some(_) => Err(self.invalid(key, "expected a number")),
        }
    }

    fn string(&self, key: &str) -> Result<Option<&str>, ConfigurationError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid(key, "expected a string")),
        }
    }
}

impl Operator {
    /// Parse and validate a module's operator.
    pub fn from_descriptor(descriptor: &ModuleDescriptor) -> Result<Self, ConfigurationError> {
        let key = descriptor.operator.as_str();
        let attrs = Attributes {
            operator: key,
            values: &descriptor.attributes,
        };

        let operator = match key {
            "add" => Self::Add,
            "subtract" => Self::Subtract,
            "multiply" => Self::Multiply,
            "divide" => Self::Divide,
            "power" => Self::Power,
            "gcd" => Self::Gcd,
            "lcm" => Self::Lcm,
            "abs" => Self::Abs,
            "log" => Self::Log,
            "round" => Self::Round(match attrs.string("mode")? {
                None | Some("round") => RoundMode::Nearest,
                Some("floor") => RoundMode::Floor,
                Some("ceil") => RoundMode::Ceil,
                Some(_) => return Err(attrs.invalid("mode", "expected round, floor or ceil")),
            }),
            "atan2" => Self::Atan2 {
                degrees: attrs.bool("deg", false)?,
            },
            "max" => Self::Max,
            "min" => Self::Min,
            "threshold" => Self::Threshold {
                threshold: attrs.number("threshold", 0.0)?,
                falling: attrs.bool("falling", false)?,
            },
            "append" => Self::Append,
            "fft" => Self::Fft,
            "autocorrelation" => Self::Autocorrelation {
                min_x: attrs.number("min_x", f64::NEG_INFINITY)?,
                max_x: attrs.number("max_x", f64::INFINITY)?,
            },
            "crosscorrelation" => Self::Crosscorrelation,
            "differentiate" => Self::Differentiate,
            "integrate" => Self::Integrate,
            "ramp" => Self::Ramp,
            "const" => Self::Const,
            "binning" => Self::Binning,
            "if" => Self::If {
                less: attrs.bool("less", false)?,
                equal: attrs.bool("equal", false)?,
                greater: attrs.bool("greater", true)?,
            },
            "average" => Self::Average,
            "count" => Self::Count,
            "first" => Self::First,
            "subrange" => Self::Subrange,
            "rangefilter" => Self::RangeFilter,
            "sort" => Self::Sort {
                descending: attrs.bool("descending", false)?,
            },
            "gausssmooth" => {
                let sigma = attrs.number("sigma", 3.0)?;
                if !(sigma.is_finite() && sigma > 0.0) {
                    return Err(attrs.invalid("sigma", "must be positive"));
                }
                Self::GaussSmooth { sigma }
            }
            "match" => Self::Match,
            other => match TrigFunction::from_key(other) {
                Some(function) => Self::Trig {
                    function,
                    degrees: attrs.bool("deg", false)?,
                },
                None => return Err(ConfigurationError::UnknownOperator(other.to_string())),
            },
        };

        operator.check_arity(key, descriptor.inputs.len(), descriptor.outputs.len())?;
        Ok(operator)
    }

    fn signature(&self) -> Signature {
        use Outputs::*;
        match self {
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Gcd | Self::Lcm => {
                Signature::new(1, None, Fixed(1))
            }
            Self::Power | Self::Atan2 { .. } | Self::Crosscorrelation => {
                Signature::new(2, Some(2), Fixed(1))
            }
            Self::Abs
            | Self::Log
            | Self::Round(_)
            | Self::Trig { .. }
            | Self::Differentiate
            | Self::Integrate
            | Self::GaussSmooth { .. } => Signature::new(1, Some(1), Fixed(1)),
            Self::Max | Self::Min => Signature::new(1, Some(2), Fixed(2)),
            Self::Threshold { .. } => Signature::new(1, Some(3), Fixed(1)),
            Self::Append => Signature::new(1, None, Fixed(1)),
            Self::Fft | Self::Autocorrelation { .. } => Signature::new(1, Some(2), Fixed(2)),
            Self::Ramp => Signature::new(3, Some(3), Fixed(1)),
            Self::Const => Signature::new(2, Some(2), Fixed(1)),
            Self::Binning => Signature::new(1, Some(3), Fixed(2)),
            Self::If { .. } => Signature::new(2, Some(4), Fixed(1)),
            Self::Average => Signature::new(1, Some(1), Fixed(2)),
            Self::Count | Self::First | Self::Sort { .. } | Self::Match => {
                Signature::new(1, None, PerInput)
            }
            Self::Subrange => Signature::new(3, None, PerInputAfter(2)),
            Self::RangeFilter => Signature::new(1, None, PerGroup(3)),
        }
    }

    fn check_arity(&self, key: &str, inputs: usize, outputs: usize) -> Result<(), ConfigurationError> {
        let signature = self.signature();
        let arity = |detail: String| ConfigurationError::Arity {
            operator: key.to_string(),
            detail,
        };

        if inputs < signature.min_inputs {
            return Err(arity(format!(
                "expected at least {} inputs, got {inputs}",
                signature.min_inputs
            )));
        }
        if let Some(max) = signature.max_inputs {
            if inputs > max {
                return Err(arity(format!("expected at most {max} inputs, got {inputs}")));
            }
        }
        let max_outputs = signature.max_outputs(inputs);
        if outputs == 0 || outputs > max_outputs {
            return Err(arity(format!(
                "expected 1 to {max_outputs} outputs, got {outputs}"
            )));
        }
        Ok(())
    }

    /// Run the operator. `inputs[i]` is `None` for an empty slot.
    ///
    /// The result has one entry per output slot the operator offers; `None`
    /// means the slot is left untouched this iteration.
    pub fn apply(&self, inputs: &[Option<Vec<f64>>]) -> Vec<Option<Vec<f64>>> {
        let args = Args(inputs);
        match self {
            Self::Add => vec![Some(ops::fold_with(&args.present(), |a, b| a + b))],
            Self::Subtract => vec![Some(ops::fold_with(&args.present(), |a, b| a - b))],
            Self::Multiply => vec![Some(ops::fold_with(&args.present(), |a, b| a * b))],
            Self::Divide => vec![Some(ops::fold_with(&args.present(), |a, b| a / b))],
            Self::Gcd => vec![Some(ops::fold_with(&args.present(), ops::gcd))],
            Self::Lcm => vec![Some(ops::fold_with(&args.present(), ops::lcm))],
            Self::Power => vec![Some(ops::zip_with(args.array(0), args.array(1), f64::powf))],
            Self::Atan2 { degrees } => {
                let degrees = *degrees;
                vec![Some(ops::zip_with(args.array(0), args.array(1), |y, x| {
                    let angle = y.atan2(x);
                    if degrees {
                        angle.to_degrees()
                    } else {
                        angle
                    }
                }))]
            }
            Self::Abs => vec![Some(ops::map(args.array(0), f64::abs))],
            Self::Log => vec![Some(ops::map(args.array(0), f64::ln))],
            Self::Round(mode) => {
                let f: fn(f64) -> f64 = match mode {
                    RoundMode::Nearest => f64::round,
                    RoundMode::Floor => f64::floor,
                    RoundMode::Ceil => f64::ceil,
                };
                vec![Some(ops::map(args.array(0), f))]
            }
            Self::Trig { function, degrees } => {
                vec![Some(ops::map(args.array(0), |v| function.eval(v, *degrees)))]
            }
            Self::Max | Self::Min => {
                let (x, y) = args.optional_x_and_y();
                let (position, value) = if *self == Self::Max {
                    ops::extreme(x, y, |a, b| a > b)
                } else {
                    ops::extreme(x, y, |a, b| a < b)
                };
                vec![Some(vec![value]), Some(vec![position])]
            }
            Self::Threshold { threshold, falling } => {
                let (x, y) = args.optional_x_and_y();
                let threshold = args.scalar(2).unwrap_or(*threshold);
                vec![Some(vec![ops::threshold(x, y, threshold, *falling)])]
            }
            Self::Append => {
                let joined = args.present().concat();
                vec![Some(joined)]
            }
            Self::Fft => {
                let (re, im) = ops::fft(args.array(0), args.get(1));
                vec![Some(re), Some(im)]
            }
            Self::Autocorrelation { min_x, max_x } => {
                let (x, y) = args.optional_x_and_y();
                let (lags, values) = ops::autocorrelation(x, y, *min_x, *max_x);
                vec![Some(lags), Some(values)]
            }
            Self::Crosscorrelation => {
                vec![Some(ops::crosscorrelation(args.array(0), args.array(1)))]
            }
            Self::Differentiate => vec![Some(ops::differentiate(args.array(0)))],
            Self::Integrate => vec![Some(ops::integrate(args.array(0)))],
            Self::Ramp => match (args.scalar(0), args.scalar(1), args.scalar(2)) {
                (Some(start), Some(stop), Some(length)) => {
                    vec![Some(ops::ramp(start, stop, length))]
                }
                _ => vec![Some(Vec::new())],
            },
            Self::Const => match (args.scalar(0), args.scalar(1)) {
                (Some(value), Some(length)) => vec![Some(ops::constant(value, length))],
                _ => vec![Some(Vec::new())],
            },
            Self::Binning => {
                let x0 = args.scalar(1).unwrap_or(0.0);
                let dx = args.scalar(2).unwrap_or(1.0);
                let (starts, counts) = ops::binning(args.array(0), x0, dx);
                vec![Some(starts), Some(counts)]
            }
            Self::If {
                less,
                equal,
                greater,
            } => {
                let (Some(a), Some(b)) = (args.scalar(0), args.scalar(1)) else {
                    return vec![None];
                };
                let holds = (*less && a < b) || (*equal && a == b) || (*greater && a > b);
                let chosen = if holds { 2 } else { 3 };
                vec![args.get(chosen).map(<[f64]>::to_vec)]
            }
            Self::Average => {
                let (mean, std_dev) = ops::average(args.array(0));
                vec![Some(vec![mean]), Some(vec![std_dev])]
            }
            Self::Count => (0..inputs.len())
                .map(|i| Some(vec![args.array(i).len() as f64]))
                .collect(),
            Self::First => (0..inputs.len())
                .map(|i| Some(vec![args.array(i).first().copied().unwrap_or(f64::NAN)]))
                .collect(),
            Self::Subrange => {
                let arrays = &inputs[2..];
                arrays
                    .iter()
                    .map(|array| {
                        let array = array.as_deref().unwrap_or(&[]);
                        let (start, end) =
                            ops::subrange_bounds(args.scalar(0), args.scalar(1), array.len());
                        Some(array[start..end].to_vec())
                    })
                    .collect()
            }
            Self::RangeFilter => {
                let groups: Vec<(&[f64], f64, f64)> = (0..inputs.len())
                    .step_by(3)
                    .map(|i| {
                        (
                            args.array(i),
                            args.scalar(i + 1).unwrap_or(f64::NEG_INFINITY),
                            args.scalar(i + 2).unwrap_or(f64::INFINITY),
                        )
                    })
                    .collect();
                let keep = ops::range_mask(&groups);
                groups
                    .iter()
                    .map(|(array, _, _)| Some(ops::select(array, &keep)))
                    .collect()
            }
            Self::Sort { descending } => {
                let order = ops::sort_order(args.array(0), *descending);
                (0..inputs.len())
                    .map(|i| Some(ops::select(args.array(i), &order)))
                    .collect()
            }
            Self::GaussSmooth { sigma } => vec![Some(ops::gauss_smooth(args.array(0), *sigma))],
            Self::Match => {
                let arrays: Vec<&[f64]> = (0..inputs.len()).map(|i| args.array(i)).collect();
                let keep = ops::finite_mask(&arrays);
                arrays
                    .iter()
                    .map(|array| Some(ops::select(array, &keep)))
                    .collect()
            }
        }
    }
}

/// Read helpers over gathered module inputs.
struct Args<'a>(&'a [Option<Vec<f64>>]);

impl<'a> Args<'a> {
    fn get(&self, i: usize) -> Option<&'a [f64]> {
        self.0.get(i).and_then(|v| v.as_deref())
    }

    /// Contents of slot `i`, empty if the slot is absent.
    fn array(&self, i: usize) -> &'a [f64] {
        self.get(i).unwrap_or(&[])
    }

    /// Last value of slot `i`.
    fn scalar(&self, i: usize) -> Option<f64> {
        self.get(i).and_then(|v| v.last().copied())
    }

    /// All non-empty slots, in order.
    fn present(&self) -> Vec<&'a [f64]> {
        self.0.iter().filter_map(|v| v.as_deref()).collect()
    }

    /// `(x, y)` for operators taking an optional abscissa before `y`.
    fn optional_x_and_y(&self) -> (Option<&'a [f64]>, &'a [f64]) {
        if self.0.len() < 2 {
            (None, self.array(0))
        } else {
            (self.get(0), self.array(1))
        }
    }
}
