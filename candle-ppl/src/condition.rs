//! Conditioning: pin named sites of a model to observed values.

use std::collections::HashMap;

use candle_core::Tensor;

use crate::context::Context;
use crate::error::Result;
use crate::model::Model;

/// Site name → observed value
#[derive(Clone, Debug, Default)]
pub struct Observations {
    values: HashMap<String, Tensor>,
}

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: Tensor) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: Tensor) -> Option<Tensor> {
        self.values.insert(name.to_string(), value)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Merge `other` into `self`; `other` wins on collisions
    pub fn merge(&mut self, other: Observations) {
        self.values.extend(other.values);
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for Observations {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A model whose sites named in `observations` are observed.
///
/// The base model is left untouched and its return value is passed
/// through unchanged.
pub struct Conditioned<M> {
    model: M,
    observations: Observations,
}

/// Condition `model` on `observations`.
///
/// Nesting is allowed: the conditioning applied last (the outermost
/// wrapper) takes precedence when two layers name the same site.
pub fn condition<M>(model: M, observations: Observations) -> Conditioned<M> {
    Conditioned {
        model,
        observations,
    }
}

impl<M> Conditioned<M> {
    /// Add more observations to this layer, overriding existing names
    pub fn condition(mut self, observations: Observations) -> Self {
        self.observations.merge(observations);
        self
    }

    pub fn observations(&self) -> &Observations {
        &self.observations
    }

    pub fn inner(&self) -> &M {
        &self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }
}

impl<A, M> Model<A> for Conditioned<M>
where
    A: ?Sized,
    M: Model<A>,
{
    type Output = M::Output;

    fn run(&self, ctx: &mut Context<'_>, args: &A) -> Result<M::Output> {
        ctx.push_observations(self.observations.clone());
        let ret = self.model.run(ctx, args);
        ctx.pop_observations();
        ret
    }
}
