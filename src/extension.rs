//! Registration with a host query engine: the `zipfile` table module
//! and the compression scalar functions that go with it.
//!
//! | Function                     | Result                                      |
//! |------------------------------|---------------------------------------------|
//! | `crc32(blob)`                | CRC-32 as an unsigned integer, 0 for NULL   |
//! | `inflate(blob)`              | raw-inflated blob                           |
//! | `deflate(blob[, level])`     | raw-deflated blob, as ZIP entries store it  |
//! | `compress(blob[, level])`    | zlib-wrapped deflate                        |
//! | `uncompress(blob)`           | inverse of `compress`                       |
//!
//! `uncompress` expects a zlib wrapper, so it rejects what `deflate` produces.
//! (Other `zipfile` implementations register it as a second name for raw
//! `inflate`; use `inflate` for raw streams here.)
//!
//! Levels run from 0 to 9 and default to 9.
//! Apart from `crc32`, a NULL argument gives a NULL result.

use log::*;

use crate::compress::{self, DEFAULT_LEVEL};
use crate::result::*;
use crate::value::Value;
use crate::vtab::ZipModule;

/// A scalar SQL function
pub type ScalarFunction = fn(&[Value<'_>]) -> ZipResult<Value<'static>>;

/// How many arguments a scalar function takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    /// Any number; the function checks for itself.
    Variadic,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => n == count,
            Arity::Variadic => true,
        }
    }
}

/// The registration half of a host's extension API
pub trait Registrar {
    fn create_function(
        &mut self,
        name: &str,
        arity: Arity,
        function: ScalarFunction,
    ) -> ZipResult<()>;

    fn create_module(&mut self, name: &str, module: ZipModule) -> ZipResult<()>;
}

/// Registers everything this crate provides with `host`,
/// stopping at the first failure.
pub fn register<R: Registrar + ?Sized>(host: &mut R) -> ZipResult<()> {
    host.create_function("crc32", Arity::Exactly(1), crc32)?;
    host.create_function("inflate", Arity::Exactly(1), inflate)?;
    host.create_function("deflate", Arity::Variadic, deflate)?;
    host.create_function("uncompress", Arity::Exactly(1), uncompress)?;
    host.create_function("compress", Arity::Variadic, compress)?;
    host.create_module(ZipModule::NAME, ZipModule)?;
    debug!("Registered the {} module and its functions", ZipModule::NAME);
    Ok(())
}

fn crc32(args: &[Value<'_>]) -> ZipResult<Value<'static>> {
    let [input] = args else {
        return Err(ZipError::Arguments("need one argument"));
    };
    Ok(Value::Integer(i64::from(compress::crc32(&input.as_blob()))))
}

fn inflate(args: &[Value<'_>]) -> ZipResult<Value<'static>> {
    let [input] = args else {
        return Err(ZipError::Arguments("need one argument"));
    };
    if input.is_null() {
        return Ok(Value::Null);
    }
    compress::inflate(&input.as_blob()).map(Value::from)
}

fn uncompress(args: &[Value<'_>]) -> ZipResult<Value<'static>> {
    let [input] = args else {
        return Err(ZipError::Arguments("need one argument"));
    };
    if input.is_null() {
        return Ok(Value::Null);
    }
    compress::uncompress(&input.as_blob()).map(Value::from)
}

fn deflate(args: &[Value<'_>]) -> ZipResult<Value<'static>> {
    with_level(args, compress::deflate)
}

fn compress(args: &[Value<'_>]) -> ZipResult<Value<'static>> {
    with_level(args, compress::compress)
}

/// Unpacks `(blob[, level])` and runs `deflater` on it.
fn with_level(
    args: &[Value<'_>],
    deflater: fn(&[u8], i64) -> ZipResult<Vec<u8>>,
) -> ZipResult<Value<'static>> {
    let (input, level) = match args {
        [input] => (input, DEFAULT_LEVEL),
        [input, level] => (
            input,
            level
                .as_integer()
                .ok_or(ZipError::Arguments("level must be an integer"))?,
        ),
        _ => return Err(ZipError::Arguments("need one or two arguments")),
    };
    if input.is_null() {
        return Ok(Value::Null);
    }
    deflater(&input.as_blob(), level).map(Value::from)
}
