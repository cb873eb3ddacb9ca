//! Tagged values exchanged with the managed side.

use core::fmt;

use wasmtime::{Val, ValType};

use crate::{Error, Result};

/// Value kind tags, numbered like the engine's C API.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValKind {
    I32 = 0,
    I64 = 1,
    F32 = 2,
    F64 = 3,
}

impl ValKind {
    pub fn val_type(self) -> ValType {
        match self {
            ValKind::I32 => ValType::I32,
            ValKind::I64 => ValType::I64,
            ValKind::F32 => ValType::F32,
            ValKind::F64 => ValType::F64,
        }
    }

    pub fn of_type(ty: &ValType) -> Result<Self> {
        match ty {
            ValType::I32 => Ok(ValKind::I32),
            ValType::I64 => Ok(ValKind::I64),
            ValType::F32 => Ok(ValKind::F32),
            ValType::F64 => Ok(ValKind::F64),
            other => Err(Error::UnsupportedValue(format!("{other:?}"))),
        }
    }
}

impl TryFrom<u8> for ValKind {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ValKind::I32),
            1 => Ok(ValKind::I64),
            2 => Ok(ValKind::F32),
            3 => Ok(ValKind::F64),
            other => Err(Error::UnsupportedValue(format!("tag {other}"))),
        }
    }
}

/// Payload of a [`RawVal`]. Floats travel as their bit patterns so NaN
/// payloads survive the crossing.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawValUnion {
    pub i32: i32,
    pub i64: i64,
    pub f32: u32,
    pub f64: u64,
}

/// One slot of a native value array.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVal {
    pub kind: u8,
    pub of: RawValUnion,
}

impl RawVal {
    pub fn i32(v: i32) -> Self {
        Self {
            kind: ValKind::I32 as u8,
            of: RawValUnion { i32: v },
        }
    }

    pub fn i64(v: i64) -> Self {
        Self {
            kind: ValKind::I64 as u8,
            of: RawValUnion { i64: v },
        }
    }

    pub fn f32(v: f32) -> Self {
        Self {
            kind: ValKind::F32 as u8,
            of: RawValUnion { f32: v.to_bits() },
        }
    }

    pub fn f64(v: f64) -> Self {
        Self {
            kind: ValKind::F64 as u8,
            of: RawValUnion { f64: v.to_bits() },
        }
    }

    /// All-zero value of `kind`; used to pre-fill result arrays.
    pub fn zero(kind: ValKind) -> Self {
        Self {
            kind: kind as u8,
            of: RawValUnion { i64: 0 },
        }
    }

    pub fn kind(&self) -> Result<ValKind> {
        ValKind::try_from(self.kind)
    }

    pub fn from_val(val: &Val) -> Result<Self> {
        match val {
            Val::I32(v) => Ok(Self::i32(*v)),
            Val::I64(v) => Ok(Self::i64(*v)),
            Val::F32(bits) => Ok(Self {
                kind: ValKind::F32 as u8,
                of: RawValUnion { f32: *bits },
            }),
            Val::F64(bits) => Ok(Self {
                kind: ValKind::F64 as u8,
                of: RawValUnion { f64: *bits },
            }),
            other => Err(Error::UnsupportedValue(format!("{other:?}"))),
        }
    }

    pub fn to_val(&self) -> Result<Val> {
        // SAFETY: every variant of the union is plain old data, and `kind`
        // picks the one that was written.
        let val = unsafe {
            match self.kind()? {
                ValKind::I32 => Val::I32(self.of.i32),
                ValKind::I64 => Val::I64(self.of.i64),
                ValKind::F32 => Val::F32(self.of.f32),
                ValKind::F64 => Val::F64(self.of.f64),
            }
        };
        Ok(val)
    }

    /// Like [`RawVal::to_val`], but refuses a value whose tag differs from
    /// the declared `expected` kind.
    pub fn to_val_of(&self, expected: ValKind) -> Result<Val> {
        let found = self.kind()?;
        if found != expected {
            return Err(Error::KindMismatch { expected, found });
        }
        self.to_val()
    }

    pub fn as_i32(&self) -> Option<i32> {
        (self.kind == ValKind::I32 as u8).then(|| unsafe { self.of.i32 })
    }

    pub fn as_i64(&self) -> Option<i64> {
        (self.kind == ValKind::I64 as u8).then(|| unsafe { self.of.i64 })
    }

    pub fn as_f32(&self) -> Option<f32> {
        (self.kind == ValKind::F32 as u8).then(|| f32::from_bits(unsafe { self.of.f32 }))
    }

    pub fn as_f64(&self) -> Option<f64> {
        (self.kind == ValKind::F64 as u8).then(|| f64::from_bits(unsafe { self.of.f64 }))
    }
}

impl fmt::Debug for RawVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_val() {
            Ok(val) => write!(f, "RawVal({val:?})"),
            Err(_) => write!(f, "RawVal(<kind {}>)", self.kind),
        }
    }
}

impl PartialEq for RawVal {
    fn eq(&self, other: &Self) -> bool {
        // SAFETY: 32-bit kinds only ever have their low half written, so
        // only that half is compared for them.
        self.kind == other.kind
            && match ValKind::try_from(self.kind) {
                Ok(ValKind::I32) | Ok(ValKind::F32) => unsafe { self.of.f32 == other.of.f32 },
                Ok(_) => unsafe { self.of.i64 == other.of.i64 },
                Err(_) => false,
            }
    }
}

/// Marshals an engine argument list into a raw array.
pub(crate) fn lower(vals: &[Val]) -> Result<Vec<RawVal>> {
    vals.iter().map(RawVal::from_val).collect()
}

/// Writes raw values into engine slots, checking each against its declared
/// kind.
pub(crate) fn lift(raw: &[RawVal], kinds: &[ValKind], out: &mut [Val]) -> Result<()> {
    if raw.len() != kinds.len() {
        return Err(Error::Arity {
            what: "results",
            expected: kinds.len(),
            found: raw.len(),
        });
    }
    if out.len() != kinds.len() {
        return Err(Error::Arity {
            what: "result slots",
            expected: kinds.len(),
            found: out.len(),
        });
    }
    for ((slot, raw), kind) in out.iter_mut().zip(raw).zip(kinds) {
        *slot = raw.to_val_of(*kind)?;
    }
    Ok(())
}
