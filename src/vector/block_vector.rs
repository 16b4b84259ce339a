//! Ghost-extended vector over a [`CommPattern`].

use std::io::Write;
use std::rc::Rc;

use crate::error::{LssError, Result};
use crate::parallel::{Comm, CommPattern};
use crate::system::IndexMap;

use super::Vector;

#[derive(Clone, Default)]
pub struct BlockVector {
    pattern: Option<Rc<CommPattern>>,
    map: Rc<IndexMap>,
    data: Vec<f64>,
}

impl BlockVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(&self) -> Option<&Rc<CommPattern>> {
        self.pattern.as_ref()
    }

    pub fn index_map(&self) -> &Rc<IndexMap> {
        &self.map
    }

    /// Owned rows in storage order.
    pub fn owned(&self) -> &[f64] {
        &self.data[..self.map.num_owned_rows()]
    }

    pub fn owned_mut(&mut self) -> &mut [f64] {
        let n = self.map.num_owned_rows();
        &mut self.data[..n]
    }
}

impl Vector for BlockVector {
    fn solvertype(&self) -> &'static str {
        "native"
    }

    fn is_created(&self) -> bool {
        self.pattern.is_some()
    }

    fn neq(&self) -> usize {
        self.map.neq()
    }

    fn blockrow_size(&self) -> usize {
        self.map.num_blocks()
    }

    fn create_with_map(&mut self, pattern: Rc<CommPattern>, map: Rc<IndexMap>) -> Result<()> {
        if self.is_created() {
            return Err(LssError::Setup("vector already created".into()));
        }
        if map.num_blocks() != pattern.size() {
            return Err(LssError::Setup(format!(
                "index map over {} blocks for a pattern of {} local ids",
                map.num_blocks(),
                pattern.size()
            )));
        }
        self.data = vec![0.0; map.len()];
        self.map = map;
        self.pattern = Some(pattern);
        Ok(())
    }

    fn destroy(&mut self) {
        *self = Self::default();
    }

    fn set_value(&mut self, row: usize, value: f64) {
        debug_assert!(self.is_created());
        self.data[self.map.p2m()[row]] = value;
    }

    fn add_value(&mut self, row: usize, value: f64) {
        debug_assert!(self.is_created());
        self.data[self.map.p2m()[row]] += value;
    }

    fn get_value(&self, row: usize) -> f64 {
        debug_assert!(self.is_created());
        self.data[self.map.p2m()[row]]
    }

    fn reset(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    fn sync(&mut self) -> Result<()> {
        let pattern = self
            .pattern
            .as_ref()
            .ok_or_else(|| LssError::Setup("vector is not created".into()))?;
        pattern.synchronize_slice(&mut self.data, self.map.neq(), Some(self.map.p2m()))
    }

    fn set_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.data.len() {
            return Err(LssError::Setup(format!(
                "{} values for a vector of {} rows",
                values.len(),
                self.data.len()
            )));
        }
        for (row, &v) in values.iter().enumerate() {
            self.data[self.map.p2m()[row]] = v;
        }
        Ok(())
    }

    fn get_values(&self) -> Vec<f64> {
        self.map.p2m().iter().map(|&o| self.data[o]).collect()
    }

    fn data(&self) -> &[f64] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    fn norm(&self) -> Result<f64> {
        let local: f64 = self.owned().iter().map(|v| v * v).sum();
        match &self.pattern {
            Some(pattern) => Ok(pattern.comm().all_reduce_sum(local)?.sqrt()),
            None => Ok(0.0),
        }
    }

    fn print(&self, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "VARIABLES=COL,ROW,VAL")?;
        writeln!(
            out,
            "ZONE T=\"vector, {} block rows x {} equations\"",
            self.blockrow_size(),
            self.neq()
        )?;
        for (row, &o) in self.map.p2m().iter().enumerate() {
            writeln!(out, "0 {} {:e}", -(row as i64), self.data[o])?;
        }
        Ok(())
    }
}
