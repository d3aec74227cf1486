use async_trait::async_trait;
use uuid::Uuid;

use common::{FlightContext, Result, Step, StepResult};
use metadata::{LockMode, LockableResource, MetadataCatalog};

/// What a lock step does when the resource row does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundPolicy {
    Fail,
    /// Treat a missing row as success, e.g. when racing another delete.
    Ignore,
}

#[derive(Debug, Clone)]
pub struct LockResourceStep {
    catalog: MetadataCatalog,
    resource: LockableResource,
    mode: LockMode,
    id_key: &'static str,
    not_found: NotFoundPolicy,
}

impl LockResourceStep {
    pub fn new(
        catalog: MetadataCatalog,
        resource: LockableResource,
        mode: LockMode,
        id_key: &'static str,
        not_found: NotFoundPolicy,
    ) -> Self {
        Self {
            catalog,
            resource,
            mode,
            id_key,
            not_found,
        }
    }

    async fn lock(&self, context: &FlightContext) -> Result<()> {
        let id: Uuid = context.input(self.id_key)?;
        match self
            .catalog
            .lock(self.resource, id, self.mode, context.flight_id())
            .await
        {
            Err(e) if e.is_not_found() && self.not_found == NotFoundPolicy::Ignore => {
                log::info!("{} {id} is gone; nothing to lock", self.resource);
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl Step for LockResourceStep {
    fn name(&self) -> &'static str {
        "LockResource"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.lock(context).await.into()
    }

    async fn undo_step(&self, context: &mut FlightContext) -> StepResult {
        let result = match context.input::<Uuid>(self.id_key) {
            Ok(id) => self
                .catalog
                .unlock(self.resource, id, self.mode, context.flight_id())
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        crate::undo_completed(self.name(), result)
    }
}

#[derive(Debug, Clone)]
pub struct UnlockResourceStep {
    catalog: MetadataCatalog,
    resource: LockableResource,
    mode: LockMode,
    id_key: &'static str,
}

impl UnlockResourceStep {
    pub fn new(
        catalog: MetadataCatalog,
        resource: LockableResource,
        mode: LockMode,
        id_key: &'static str,
    ) -> Self {
        Self {
            catalog,
            resource,
            mode,
            id_key,
        }
    }

    async fn unlock(&self, context: &FlightContext) -> Result<()> {
        let id: Uuid = context.input(self.id_key)?;
        let released = self
            .catalog
            .unlock(self.resource, id, self.mode, context.flight_id())
            .await?;
        if !released {
            log::debug!("{} {id} was not locked by {}", self.resource, context.flight_id());
        }
        Ok(())
    }
}

#[async_trait]
impl Step for UnlockResourceStep {
    fn name(&self) -> &'static str {
        "UnlockResource"
    }

    async fn do_step(&self, context: &mut FlightContext) -> StepResult {
        self.unlock(context).await.into()
    }

    async fn undo_step(&self, _context: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}
