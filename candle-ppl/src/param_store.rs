//! Named, persistent table of learnable tensors.
//!
//! The store exclusively owns the raw (unconstrained) tensors as candle
//! `Var`s; optimizers borrow them through [`ParamStore::all_vars`] and
//! update them in place. A `ParamStore` is a cheap handle: clones share
//! the same table, and all access goes through one mutex.
//!
//! A second, coarser lock serializes whole updates: an SVI step holds
//! [`ParamStore::update_guard`] from the forward pass through the last
//! optimizer write, so loops on other threads sharing the store never
//! see (or write over) a half-applied step.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use candle_core::{Device, Tensor, Var};
use log::{debug, info};

use crate::constraints::Constraint;
use crate::error::{PplError, Result};

struct ParamEntry {
    raw: Var,
    constraint: Constraint,
}

#[derive(Default)]
struct StoreInner {
    /// registration order
    names: Vec<String>,
    entries: HashMap<String, ParamEntry>,
}

impl StoreInner {
    fn insert(&mut self, name: &str, raw: Var, constraint: Constraint) {
        if self
            .entries
            .insert(name.to_string(), ParamEntry { raw, constraint })
            .is_none()
        {
            self.names.push(name.to_string());
        }
    }
}

#[derive(Clone, Default)]
pub struct ParamStore {
    inner: Arc<Mutex<StoreInner>>,
    updates: Arc<Mutex<()>>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        self.inner.lock().map_err(|_| PplError::StorePoisoned)
    }

    /// Exclusive right to read-modify-write the parameters.
    ///
    /// Registration and lookups do not take this lock, so they stay
    /// usable while it is held. Not reentrant.
    pub fn update_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.updates.lock().map_err(|_| PplError::StorePoisoned)
    }

    /// Register `name` on first use and return its constrained value.
    ///
    /// The first registration fixes the initial value and the
    /// constraint. Later calls return the constrained view of the
    /// current raw tensor and ignore both `init` and `constraint`, so a
    /// training loop that re-runs the guide keeps optimizing the same
    /// tensor.
    pub fn param(&self, name: &str, init: &Tensor, constraint: Constraint) -> Result<Tensor> {
        self.param_with(name, || Ok(init.clone()), constraint)
    }

    /// Same as [`ParamStore::param`], but the initial value is only
    /// computed when `name` is not registered yet.
    pub fn param_with<F>(&self, name: &str, init: F, constraint: Constraint) -> Result<Tensor>
    where
        F: FnOnce() -> candle_core::Result<Tensor>,
    {
        if let Some(value) = self.constrained(name)? {
            return Ok(value);
        }

        let init = init()?.detach();
        if !constraint.check(&init)? {
            return Err(PplError::InvalidConstraint(format!(
                "initial value of '{}' is outside of {}",
                name, constraint
            )));
        }
        let raw = Var::from_tensor(&constraint.unconstrain(&init)?)?;

        let mut inner = self.lock()?;
        // another handle may have registered it while we built `init`
        if !inner.entries.contains_key(name) {
            debug!(
                "register parameter '{}' {:?} ({})",
                name,
                raw.dims(),
                constraint
            );
            inner.insert(name, raw, constraint);
        }
        let entry = &inner.entries[name];
        Ok(entry.constraint.constrain(entry.raw.as_tensor())?)
    }

    fn constrained(&self, name: &str) -> Result<Option<Tensor>> {
        let inner = self.lock()?;
        match inner.entries.get(name) {
            Some(entry) => Ok(Some(entry.constraint.constrain(entry.raw.as_tensor())?)),
            None => Ok(None),
        }
    }

    /// Constrained value of `name`, without registering anything
    pub fn get(&self, name: &str) -> Result<Tensor> {
        self.constrained(name)?
            .ok_or_else(|| PplError::UnknownParameter(name.to_string()))
    }

    /// The raw (unconstrained) tracked tensor of `name`
    pub fn get_raw(&self, name: &str) -> Result<Var> {
        let inner = self.lock()?;
        inner
            .entries
            .get(name)
            .map(|entry| entry.raw.clone())
            .ok_or_else(|| PplError::UnknownParameter(name.to_string()))
    }

    pub fn constraint(&self, name: &str) -> Result<Constraint> {
        let inner = self.lock()?;
        inner
            .entries
            .get(name)
            .map(|entry| entry.constraint)
            .ok_or_else(|| PplError::UnknownParameter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.lock()?.entries.contains_key(name))
    }

    /// Parameter names in registration order
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.names.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.names.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// All raw tensors, in registration order
    pub fn all_vars(&self) -> Result<Vec<Var>> {
        Ok(self
            .named_vars()?
            .into_iter()
            .map(|(_, var)| var)
            .collect())
    }

    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let inner = self.lock()?;
        Ok(inner
            .names
            .iter()
            .map(|name| (name.clone(), inner.entries[name].raw.clone()))
            .collect())
    }

    /// Drop every parameter. The next registration of a name starts
    /// from its initial value again.
    pub fn clear(&self) -> Result<()> {
        let _updates = self.update_guard()?;
        let mut inner = self.lock()?;
        info!("clearing {} parameter(s)", inner.names.len());
        inner.names.clear();
        inner.entries.clear();
        Ok(())
    }

    /// Save raw tensors to `path` (safetensors) and their constraints to
    /// `{path}.json`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let inner = self.lock()?;

        let tensors: HashMap<String, Tensor> = inner
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.raw.as_detached_tensor()))
            .collect();
        candle_core::safetensors::save(&tensors, path)?;

        let constraints: serde_json::Map<String, serde_json::Value> = inner
            .names
            .iter()
            .map(|name| {
                let c = inner.entries[name].constraint.to_string();
                (name.clone(), serde_json::Value::String(c))
            })
            .collect();
        let meta = serde_json::json!({
            "names": inner.names,
            "constraints": constraints,
        });
        let writer = BufWriter::new(File::create(sidecar_path(path))?);
        serde_json::to_writer_pretty(writer, &meta)?;

        info!("saved {} parameter(s) to {:?}", inner.names.len(), path);
        Ok(())
    }

    /// Replace the contents of the store with what [`ParamStore::save`] wrote
    pub fn load<P: AsRef<Path>>(&self, path: P, device: &Device) -> Result<()> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, device)?;

        let reader = BufReader::new(File::open(sidecar_path(path))?);
        let meta: serde_json::Value = serde_json::from_reader(reader)?;

        let bad_meta = || PplError::InvalidConstraint(format!("malformed {:?}", sidecar_path(path)));
        let names = meta["names"].as_array().ok_or_else(bad_meta)?;

        let mut loaded = StoreInner::default();
        for name in names {
            let name = name.as_str().ok_or_else(bad_meta)?;
            let constraint: Constraint = meta["constraints"][name]
                .as_str()
                .ok_or_else(bad_meta)?
                .parse()?;
            let raw = tensors
                .remove(name)
                .ok_or_else(|| PplError::UnknownParameter(name.to_string()))?;
            loaded.insert(name, Var::from_tensor(&raw)?, constraint);
        }

        let _updates = self.update_guard()?;
        let mut inner = self.lock()?;
        *inner = loaded;
        info!("loaded {} parameter(s) from {:?}", inner.names.len(), path);
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".json");
    PathBuf::from(s)
}
