//! Vector back end that stores nothing.

use std::io::Write;
use std::rc::Rc;

use crate::error::{LssError, Result};
use crate::parallel::CommPattern;
use crate::system::IndexMap;

use super::Vector;

/// Keeps the shape of a vector and ignores its contents. Reads return zero.
#[derive(Clone, Debug, Default)]
pub struct EmptyVector {
    created: bool,
    neq: usize,
    blockrow_size: usize,
}

impl EmptyVector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Vector for EmptyVector {
    fn solvertype(&self) -> &'static str {
        "empty"
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn neq(&self) -> usize {
        self.neq
    }

    fn blockrow_size(&self) -> usize {
        self.blockrow_size
    }

    fn create_with_map(&mut self, pattern: Rc<CommPattern>, map: Rc<IndexMap>) -> Result<()> {
        if self.created {
            return Err(LssError::Setup("vector already created".into()));
        }
        self.neq = map.neq();
        self.blockrow_size = pattern.size();
        self.created = true;
        Ok(())
    }

    fn destroy(&mut self) {
        *self = Self::default();
    }

    fn set_value(&mut self, _row: usize, _value: f64) {}

    fn add_value(&mut self, _row: usize, _value: f64) {}

    fn get_value(&self, _row: usize) -> f64 {
        0.0
    }

    fn reset(&mut self, _value: f64) {}

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_values(&mut self, _values: &[f64]) -> Result<()> {
        Ok(())
    }

    fn get_values(&self) -> Vec<f64> {
        vec![0.0; self.blockrow_size * self.neq]
    }

    fn data(&self) -> &[f64] {
        &[]
    }

    fn data_mut(&mut self) -> &mut [f64] {
        &mut []
    }

    fn norm(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn print(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "VARIABLES=COL,ROW,VAL")?;
        writeln!(out, "ZONE T=\"empty vector, {} x {}\"", self.blockrow_size, self.neq)?;
        Ok(())
    }
}
