//! Severity lattice, limit evaluators and bit-decoding functions shared by
//! the interlock and supervisory state machines.

use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Total order over how bad a measurement is. `Bypassed*` variants carry the
/// same rank as their non-bypassed counterpart plus three, so a bypassed
/// fault still outranks a plain fault -- bypass never hides a worse reading,
/// it only tells the supervisor the interlock shouldn't act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Severity {
    Unknown,
    Ok,
    Warning,
    Fault,
    BypassedOk,
    BypassedWarning,
    BypassedFault,
}

impl Severity {
    /// Combine two severities, keeping the worse of the two.
    pub fn merge(self, other: Severity) -> Severity {
        self.max(other)
    }

    pub fn is_bypassed(self) -> bool {
        matches!(
            self,
            Severity::BypassedOk | Severity::BypassedWarning | Severity::BypassedFault
        )
    }

    /// True for anything that should move an interlock towards Fault,
    /// ignoring whether it's bypassed.
    pub fn is_at_least_warning(self) -> bool {
        matches!(
            self,
            Severity::Warning | Severity::Fault | Severity::BypassedWarning | Severity::BypassedFault
        )
    }

    pub fn is_fault(self) -> bool {
        matches!(self, Severity::Fault | Severity::BypassedFault)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Unknown
    }
}

/// A single measurement fed into a [`Limit`]. Integer limits only accept
/// `Integer`, float limits only `Float`, bitmask limits only `Bits` -- mixing
/// them up is a caller bug, not a recoverable condition, so evaluation
/// panics rather than threading a Result through every call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Integer(i64),
    Float(f64),
    Bits(u64),
}

impl Sample {
    fn as_integer(self) -> i64 {
        match self {
            Sample::Integer(v) => v,
            other => panic!("expected an integer sample, got {other:?}"),
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Sample::Float(v) => v,
            other => panic!("expected a float sample, got {other:?}"),
        }
    }

    fn as_bits(self) -> u64 {
        match self {
            Sample::Bits(v) => v,
            other => panic!("expected a bitmask sample, got {other:?}"),
        }
    }
}

/// A stateless threshold test. Each variant carries the severity to report
/// when its named condition holds (e.g. `Equal` fires when the sample
/// matches, `GreaterThan` fires when it exceeds the threshold); otherwise the
/// sample evaluates to `Severity::Ok`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
    Equal(i64, Severity),
    NotEqual(i64, Severity),
    LessThan(f64, Severity),
    LessThanEqual(f64, Severity),
    GreaterThan(f64, Severity),
    GreaterThanEqual(f64, Severity),
    InRange(f64, f64, Severity),
    NotInRange(f64, f64, Severity),
    InTolerance(f64, f64, Severity),
    NotInTolerance(f64, f64, Severity),
    AnyBitSet(u64, Severity),
    AllBitSet(u64, Severity),
    AnyBitNotSet(u64, Severity),
    AllBitNotSet(u64, Severity),
}

impl Limit {
    pub fn evaluate(&self, sample: Sample) -> Severity {
        match *self {
            Limit::Equal(want, sev) => {
                if sample.as_integer() == want {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::NotEqual(want, sev) => {
                if sample.as_integer() != want {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::LessThan(threshold, sev) => {
                if sample.as_float() < threshold {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::LessThanEqual(threshold, sev) => {
                if sample.as_float() <= threshold {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::GreaterThan(threshold, sev) => {
                if sample.as_float() > threshold {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::GreaterThanEqual(threshold, sev) => {
                if sample.as_float() >= threshold {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::InRange(low, high, sev) => {
                let v = sample.as_float();
                if v >= low && v <= high {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::NotInRange(low, high, sev) => {
                let v = sample.as_float();
                if v < low || v > high {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::InTolerance(target, tolerance, sev) => {
                if (sample.as_float() - target).abs() <= tolerance {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::NotInTolerance(target, tolerance, sev) => {
                if (sample.as_float() - target).abs() > tolerance {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::AnyBitSet(mask, sev) => {
                if sample.as_bits() & mask != 0 {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::AllBitSet(mask, sev) => {
                if sample.as_bits() & mask == mask {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::AnyBitNotSet(mask, sev) => {
                if sample.as_bits() & mask != mask {
                    sev
                } else {
                    Severity::Ok
                }
            }
            Limit::AllBitNotSet(mask, sev) => {
                if sample.as_bits() & mask == 0 {
                    sev
                } else {
                    Severity::Ok
                }
            }
        }
    }
}

/// Trips to `severity` after `threshold` consecutive non-`Ok` samples from
/// `inner`. Any `Ok` sample resets the counter to zero -- it does not decay
/// gradually.
#[derive(Debug, Clone)]
pub struct ContinuousTimedLimit {
    inner: Limit,
    threshold: u32,
    severity: Severity,
    count: u32,
}

impl ContinuousTimedLimit {
    pub fn new(inner: Limit, threshold: u32, severity: Severity) -> Self {
        Self {
            inner,
            threshold,
            severity,
            count: 0,
        }
    }

    pub fn evaluate(&mut self, sample: Sample) -> Severity {
        if self.inner.evaluate(sample) == Severity::Ok {
            self.count = 0;
            Severity::Ok
        } else {
            self.count = self.count.saturating_add(1);
            if self.count >= self.threshold {
                self.severity
            } else {
                Severity::Ok
            }
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// Trips to `severity` once at least `threshold` of the last `window`
/// samples evaluated `inner` at `Warning` or worse. Unlike
/// [`ContinuousTimedLimit`] the bad samples need not be consecutive.
#[derive(Debug, Clone)]
pub struct TimedLimit {
    inner: Limit,
    window: VecDeque<Severity>,
    capacity: usize,
    bad_count: u32,
    threshold: u32,
    severity: Severity,
}

impl TimedLimit {
    pub fn new(inner: Limit, capacity: usize, threshold: u32, severity: Severity) -> Self {
        Self {
            inner,
            window: VecDeque::with_capacity(capacity),
            capacity,
            bad_count: 0,
            threshold,
            severity,
        }
    }

    pub fn evaluate(&mut self, sample: Sample) -> Severity {
        let result = self.inner.evaluate(sample);
        self.push(result);
        if self.bad_count >= self.threshold {
            self.severity
        } else {
            Severity::Ok
        }
    }

    fn push(&mut self, result: Severity) {
        if self.window.len() == self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                if evicted.is_at_least_warning() {
                    self.bad_count -= 1;
                }
            }
        }
        if result.is_at_least_warning() {
            self.bad_count += 1;
        }
        self.window.push_back(result);
    }
}

/// Bit-decoding and interpolation primitives used to turn a raw FPGA status
/// word or ADC count into an engineering value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Function {
    Linear { m: f64, b: f64 },
    Poly5 { a: f64, b: f64, c: f64, d: f64, e: f64, f: f64 },
    AnyBitSet(u64),
    AllBitSet(u64),
    AnyBitNotSet(u64),
    AllBitNotSet(u64),
}

impl Function {
    /// Apply a `Linear` or `Poly5` function to a raw count. Panics if called
    /// on a bitmask variant.
    pub fn apply(&self, x: f64) -> f64 {
        match *self {
            Function::Linear { m, b } => m * x + b,
            Function::Poly5 { a, b, c, d, e, f } => {
                a + b * x + c * x.powi(2) + d * x.powi(3) + e * x.powi(4) + f * x.powi(5)
            }
            _ => panic!("apply() called on a bitmask Function"),
        }
    }

    /// Decode a boolean out of a raw status word. Panics if called on a
    /// `Linear`/`Poly5` variant.
    pub fn decode(&self, bits: u64) -> bool {
        match *self {
            Function::AnyBitSet(mask) => bits & mask != 0,
            Function::AllBitSet(mask) => bits & mask == mask,
            Function::AnyBitNotSet(mask) => bits & mask != mask,
            Function::AllBitNotSet(mask) => bits & mask == 0,
            _ => panic!("decode() called on a Linear/Poly5 Function"),
        }
    }
}
