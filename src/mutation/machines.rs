use async_trait::async_trait;

use super::{EntityId, Mutation, Snapshot};
use crate::api::types::WorkCenter;
use crate::api::{KeyScope, ProductionApi, ProductionCache, QueryData, QueryKey};
use crate::error::{ApiError, ValidationError};

/// Switch a work center between active and inactive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMachineActive {
  pub code: String,
  pub is_active: bool,
}

#[async_trait]
impl Mutation for SetMachineActive {
  /// The server may answer with the updated record or a bare acknowledgement.
  type Output = Option<WorkCenter>;

  fn name(&self) -> &'static str {
    "update_machine_status"
  }

  fn entity(&self) -> Option<EntityId> {
    Some(EntityId::Machine(self.code.clone()))
  }

  fn validate(&self) -> Result<(), ValidationError> {
    if self.code.trim().is_empty() {
      return Err(ValidationError::Empty { field: "work_center" });
    }
    Ok(())
  }

  fn invalidates(&self) -> Vec<KeyScope> {
    vec![KeyScope::Machines, KeyScope::Machine(self.code.clone())]
  }

  fn apply_optimistic(
    &self,
    cache: &ProductionCache,
    snapshot: &mut Snapshot,
  ) -> Result<(), ValidationError> {
    let code = self.code.as_str();
    let is_active = self.is_active;

    snapshot.patch(cache, &QueryKey::Machines, |data| {
      let mut machines = data.as_machines()?.clone();
      let machine = machines.iter_mut().find(|m| m.code == code)?;
      let was_active = std::mem::replace(&mut machine.is_active, is_active);
      let code = code.to_string();
      Some((QueryData::Machines(machines), move |data: &QueryData| {
        let mut machines = data.as_machines()?.clone();
        machines.iter_mut().find(|m| m.code == code)?.is_active = was_active;
        Some(QueryData::Machines(machines))
      }))
    });

    snapshot.patch(cache, &QueryKey::Machine(self.code.clone()), |data| {
      let previous = data.as_machine()?.clone();
      let next = WorkCenter {
        is_active,
        ..previous.clone()
      };
      Some((QueryData::Machine(next), move |_: &QueryData| {
        Some(QueryData::Machine(previous))
      }))
    });
    Ok(())
  }

  async fn execute(&self, api: &dyn ProductionApi) -> Result<Option<WorkCenter>, ApiError> {
    api.set_machine_active(&self.code, self.is_active).await
  }
}
