//! Artifact channels
//!
//! A channel is a named hand-off slot between pipeline stages. It has exactly
//! one producer, is written exactly once, and can be consumed once by each
//! declared downstream stage. Reading before the producer has written is an
//! error, which is what keeps stage N+1 from running ahead of stage N.

use cutover_core::domain::artifact::Artifact;
use cutover_core::domain::run::StageKind;
use std::collections::BTreeSet;

use crate::error::ChannelError;

/// Write-once hand-off slot between pipeline stages
#[derive(Debug)]
pub struct ArtifactChannel {
    name: String,
    producer: StageKind,
    consumers: BTreeSet<StageKind>,
    consumed_by: BTreeSet<StageKind>,
    artifact: Option<Artifact>,
}

impl ArtifactChannel {
    pub fn new(name: impl Into<String>, producer: StageKind, consumers: &[StageKind]) -> Self {
        Self {
            name: name.into(),
            producer,
            consumers: consumers.iter().copied().collect(),
            consumed_by: BTreeSet::new(),
            artifact: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn producer(&self) -> StageKind {
        self.producer
    }

    pub fn is_produced(&self) -> bool {
        self.artifact.is_some()
    }

    /// Stores the producer's output; a second write is rejected
    pub fn publish(&mut self, artifact: Artifact) -> Result<(), ChannelError> {
        if self.artifact.is_some() {
            return Err(ChannelError::AlreadyProduced(self.name.clone()));
        }

        tracing::debug!(
            "Artifact '{}' produced by {} ({})",
            self.name,
            self.producer,
            artifact.id
        );
        self.artifact = Some(artifact);
        Ok(())
    }

    /// Hands the artifact to a downstream stage, once per consumer
    pub fn consume(&mut self, consumer: StageKind) -> Result<Artifact, ChannelError> {
        if !self.consumers.contains(&consumer) {
            return Err(ChannelError::NotAConsumer {
                name: self.name.clone(),
                consumer,
            });
        }

        let artifact = self
            .artifact
            .as_ref()
            .ok_or_else(|| ChannelError::NotProduced(self.name.clone()))?;

        if !self.consumed_by.insert(consumer) {
            return Err(ChannelError::AlreadyConsumed {
                name: self.name.clone(),
                consumer,
            });
        }

        Ok(artifact.clone())
    }

    /// Releases the stored artifact at the end of a run
    pub fn discard(&mut self) -> Option<Artifact> {
        self.artifact.take()
    }
}
