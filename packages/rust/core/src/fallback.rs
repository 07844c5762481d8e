//! Primary/secondary fallback over external engines.
//!
//! The primary is tried once. Only if it fails is the secondary tried, also
//! once. There is no loop and no third engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use afriverse_gateway::{AudioClip, Transcription, TranscriptionEngine};
use afriverse_shared::{AfriverseError, ErrorClass, Result};

/// Anything with a label for logs and error messages.
pub trait Named {
    fn label(&self) -> &str;
}

impl<T: TranscriptionEngine + ?Sized> Named for T {
    fn label(&self) -> &str {
        self.name()
    }
}

/// One operation to attempt against an engine.
#[async_trait]
pub trait Attempt<E: ?Sized + Sync>: Send + Sync {
    type Output: Send;

    async fn attempt(&self, engine: &E) -> Result<Self::Output>;
}

/// Result of a fallback run, including which engine produced it.
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub value: T,
    pub served_by: String,
    /// Why the primary was skipped, when the secondary served.
    pub primary_error: Option<AfriverseError>,
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

pub struct Fallback<E: ?Sized> {
    primary: Arc<E>,
    secondary: Option<Arc<E>>,
}

impl<E> Fallback<E>
where
    E: ?Sized + Named + Send + Sync,
{
    pub fn new(primary: Arc<E>, secondary: Option<Arc<E>>) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &Arc<E> {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&Arc<E>> {
        self.secondary.as_ref()
    }

    /// Run `op` against the primary, then at most once against the secondary.
    pub async fn run<A>(&self, op: &A) -> Result<FallbackOutcome<A::Output>>
    where
        A: Attempt<E> + ?Sized,
    {
        let primary_error = match op.attempt(&self.primary).await {
            Ok(value) => {
                return Ok(FallbackOutcome {
                    value,
                    served_by: self.primary.label().to_string(),
                    primary_error: None,
                });
            }
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_error);
        };

        warn!(
            primary = self.primary.label(),
            secondary = secondary.label(),
            error = %primary_error,
            "primary engine failed, trying secondary"
        );

        match op.attempt(secondary).await {
            Ok(value) => Ok(FallbackOutcome {
                value,
                served_by: secondary.label().to_string(),
                primary_error: Some(primary_error),
            }),
            Err(secondary_error) => Err(AfriverseError::engine(
                secondary_error.class().unwrap_or(ErrorClass::Application),
                format!(
                    "primary {} failed: {primary_error}; secondary {} failed: {secondary_error}",
                    self.primary.label(),
                    secondary.label()
                ),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptionChain
// ---------------------------------------------------------------------------

struct TranscribeAttempt<'a> {
    clip: &'a AudioClip,
    language: &'a str,
}

#[async_trait]
impl<'e> Attempt<dyn TranscriptionEngine + 'e> for TranscribeAttempt<'_> {
    type Output = Transcription;

    async fn attempt(&self, engine: &(dyn TranscriptionEngine + 'e)) -> Result<Transcription> {
        engine.transcribe(self.clip, self.language).await
    }
}

/// A fallback pair of speech-to-text engines that is itself an engine.
pub struct TranscriptionChain {
    chain: Fallback<dyn TranscriptionEngine>,
    name: String,
}

impl TranscriptionChain {
    pub fn new(
        primary: Arc<dyn TranscriptionEngine>,
        secondary: Option<Arc<dyn TranscriptionEngine>>,
    ) -> Self {
        let name = match &secondary {
            Some(s) => format!("{}>{}", primary.name(), s.name()),
            None => primary.name().to_string(),
        };
        Self {
            chain: Fallback::new(primary, secondary),
            name,
        }
    }

    /// Transcribe and report which engine served.
    pub async fn transcribe_detailed(
        &self,
        clip: &AudioClip,
        language: &str,
    ) -> Result<FallbackOutcome<Transcription>> {
        self.chain.run(&TranscribeAttempt { clip, language }).await
    }
}

#[async_trait]
impl TranscriptionEngine for TranscriptionChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<Transcription> {
        let outcome = self.transcribe_detailed(clip, language).await?;
        info!(served_by = %outcome.served_by, "transcription served");
        Ok(outcome.value)
    }

    /// Available when at least one engine is. Each probe result is logged.
    async fn probe(&self) -> Result<()> {
        let primary = self.chain.primary().probe().await;
        match &primary {
            Ok(()) => info!(engine = self.chain.primary().name(), "engine available"),
            Err(e) => warn!(engine = self.chain.primary().name(), error = %e, "engine unavailable"),
        }

        let Some(secondary) = self.chain.secondary() else {
            return primary;
        };
        let fallback = secondary.probe().await;
        match &fallback {
            Ok(()) => info!(engine = secondary.name(), "engine available"),
            Err(e) => warn!(engine = secondary.name(), error = %e, "engine unavailable"),
        }

        primary.or(fallback)
    }
}
