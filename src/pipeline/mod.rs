//! Generator pipeline.
//!
//! The pipeline is an ordered list of generator types. Each run creates
//! fresh instances, so one pipeline definition can drive several sessions
//! (the shared, main and fork chains all replay the same definition).
//!
//! Position `i` (zero-based) receives the id offset `(i + 1) * 10000`;
//! offsets strictly increase in registration order and never repeat.

use crate::chain::ChainKind;
use crate::config::ValidationError;
use crate::error::SessionError;
use crate::generator::{builtin, Branch, Generator, GeneratorKind, Registration, SessionContext, OFFSET_STRIDE};
use crate::node::Liveness;
use log::{debug, error, info};

#[derive(Debug, Clone, Default)]
pub struct GeneratorPipeline {
    registrations: Vec<Registration>,
}

impl GeneratorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pipeline from built-in generator names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ValidationError> {
        let mut pipeline = GeneratorPipeline::new();
        for name in names {
            let name = name.as_ref();
            let registration = builtin::lookup(name)
                .ok_or_else(|| ValidationError::UnknownGenerator(name.to_string()))?;
            pipeline.register_entry(registration);
        }
        Ok(pipeline)
    }

    /// Append a generator type. Registration is purely additive.
    pub fn register<G: GeneratorKind>(&mut self) -> &mut Self {
        self.register_entry(Registration::of::<G>())
    }

    pub fn register_entry(&mut self, registration: Registration) -> &mut Self {
        self.registrations.push(registration);
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.name).collect()
    }

    /// Id offset for the generator at `position`.
    pub fn offset_for(position: usize) -> u64 {
        (position as u64 + 1) * OFFSET_STRIDE
    }

    pub fn offsets(&self) -> Vec<u64> {
        (0..self.registrations.len()).map(Self::offset_for).collect()
    }

    /// Fresh instances of every registered generator, in order.
    pub fn instantiate(&self, chain: ChainKind, branch: Branch) -> Vec<Box<dyn Generator>> {
        self.registrations
            .iter()
            .enumerate()
            .map(|(position, registration)| {
                let generator = registration.instantiate(chain, Self::offset_for(position), branch);
                debug!("Magic No: {} ({})", generator.offset(), generator.name());
                generator
            })
            .collect()
    }

    /// Run every generator in registration order.
    ///
    /// The first failure aborts the remaining generators and nothing is
    /// rolled back. If the node process has died by then, the failure is
    /// reported as `NodeUnavailable` instead of whatever the RPC layer saw.
    pub fn run(
        &self,
        ctx: &mut SessionContext<'_>,
        branch: Branch,
        node: &mut dyn Liveness,
    ) -> Result<Vec<Box<dyn Generator>>, SessionError> {
        let mut generators = self.instantiate(ctx.chain, branch);

        for generator in generators.iter_mut() {
            let name = generator.name().to_string();
            let height = ctx
                .rpc
                .get_block_count()
                .map_err(|e| classify(node, e.into()))?;
            info!("Starting generator {} (Block height: {})", name, height);

            if let Err(e) = generator.run(ctx) {
                let cause = classify(node, e);
                error!("Generator {} failed: {}", name, cause);
                return Err(SessionError::Generator {
                    name,
                    source: Box::new(cause),
                });
            }
        }

        Ok(generators)
    }
}

/// Replace an error with `NodeUnavailable` when the node is gone.
fn classify(node: &mut dyn Liveness, err: SessionError) -> SessionError {
    match node.ensure_alive() {
        Err(dead) => dead,
        Ok(()) => err,
    }
}
