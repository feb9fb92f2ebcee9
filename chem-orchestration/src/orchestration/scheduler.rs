//! Scheduler entry points (§4.6): the thin adapters from request payloads to
//! the procedure registry, the service registry, and the nanny.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use chem_shared::error::OrchestrationError;
use chem_shared::model::{MoleculeRef, ServiceRecord};
use chem_shared::store::Store;
use chem_shared::wire::{RequestEnvelope, ResponseEnvelope, ResponseMeta};

use crate::orchestration::nanny::QueueNanny;
use crate::orchestration::registry::ServiceRegistry;

/// Dispatches a `{meta, data}` procedure submission to its registered input
/// parser, then hands the resulting task descriptors to the nanny.
pub struct QueueScheduler {
    nanny: Arc<QueueNanny>,
}

impl QueueScheduler {
    pub fn new(nanny: Arc<QueueNanny>) -> Self {
        Self { nanny }
    }

    /// `meta` must deserialize with at least a `procedure` field selecting
    /// the registered parser; `data` is handed to the parser untouched.
    pub async fn submit(
        &self,
        procedure: &str,
        meta: Value,
        data: Value,
    ) -> Result<ResponseEnvelope<Value>, OrchestrationError> {
        let parser = self.nanny.procedures().get_input_parser(procedure)?;
        let outcome = parser
            .parse_input(self.nanny.store().as_ref(), meta, data)
            .await?;

        let n_full = outcome.full_tasks.len();
        let submitted = self.nanny.submit_tasks(outcome.full_tasks).await?;
        debug_assert_eq!(submitted.len(), n_full);

        let response_meta = ResponseMeta::ok(submitted.len())
            .with_errors(outcome.errors)
            .with_duplicates(outcome.duplicates);
        Ok(ResponseEnvelope {
            meta: response_meta,
            data: Value::Array(submitted.into_iter().map(Value::String).collect()),
        })
    }

    /// Convenience wrapper for callers holding a fully-typed envelope whose
    /// `meta` carries its own `procedure` discriminant field.
    pub async fn submit_envelope(
        &self,
        procedure: &str,
        envelope: RequestEnvelope<Value, Value>,
    ) -> Result<ResponseEnvelope<Value>, OrchestrationError> {
        self.submit(procedure, envelope.meta, envelope.data).await
    }
}

/// The `meta` block of a service-submission request: a service-kind
/// discriminant plus the kind-specific metadata forwarded verbatim to
/// `ServiceKind::initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRequestMeta {
    pub kind: String,
    #[serde(default)]
    pub hooks: Vec<chem_shared::model::HookSpec>,
    #[serde(flatten)]
    pub kind_meta: Value,
}

/// Resolves input molecules, builds one service machine per input via the
/// matching `ServiceKind` initializer, and registers them with the nanny.
pub struct ServiceScheduler {
    nanny: Arc<QueueNanny>,
    services: Arc<ServiceRegistry>,
}

impl ServiceScheduler {
    pub fn new(nanny: Arc<QueueNanny>, services: Arc<ServiceRegistry>) -> Self {
        Self { nanny, services }
    }

    pub async fn submit(
        &self,
        meta: Value,
        data: Vec<MoleculeRef>,
    ) -> Result<ResponseEnvelope<Value>, OrchestrationError> {
        let meta: ServiceRequestMeta = serde_json::from_value(meta)?;
        let kind = self.services.get(&meta.kind)?;

        let mut refs: BTreeMap<usize, MoleculeRef> = BTreeMap::new();
        for (idx, reference) in data.into_iter().enumerate() {
            refs.insert(idx, reference);
        }

        let mut errors = Vec::new();
        let mut new_services = Vec::new();
        for (idx, reference) in refs.iter() {
            let mut single = BTreeMap::new();
            single.insert(*idx, reference.clone());
            let molecule = match self.nanny.store().mixed_molecule_get(&single).await {
                Ok(mut resolved) => match resolved.remove(idx) {
                    Some(molecule) => molecule,
                    None => continue,
                },
                Err(e) => {
                    errors.push(serde_json::json!({
                        "index": idx,
                        "reference": reference.label(),
                        "reason": e.to_string(),
                    }));
                    continue;
                }
            };

            let machine = kind.initialize(meta.kind_meta.clone(), molecule).await?;
            new_services.push(ServiceRecord {
                id: None,
                kind: meta.kind.clone(),
                state: machine.get_json(),
                hooks: meta.hooks.clone(),
            });
        }

        let n_inserted = new_services.len();
        let ids = self.nanny.submit_services(new_services).await?;

        let response_meta = ResponseMeta::ok(n_inserted).with_errors(errors);
        Ok(ResponseEnvelope {
            meta: response_meta,
            data: Value::Array(ids.into_iter().map(Value::String).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chem_shared::config::NannyConfig;
    use chem_shared::store::memory::InMemoryStore;
    use chem_worker::MockAdapter;
    use serde_json::json;

    fn make_nanny() -> Arc<QueueNanny> {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::default());
        let adapter = Arc::new(MockAdapter::default());
        let procedures = Arc::new(crate::orchestration::procedures::builtin_registry());
        let services = Arc::new(crate::orchestration::services::builtin_registry());
        Arc::new(QueueNanny::new(
            store,
            adapter,
            procedures,
            services,
            NannyConfig::default(),
        ))
    }

    #[tokio::test]
    async fn queue_scheduler_submits_fresh_single_run() {
        let nanny = make_nanny();
        let molecule_id = {
            let mut molecules = BTreeMap::new();
            molecules.insert("m1".to_string(), json!({"symbols": ["H", "H"]}));
            nanny
                .store()
                .add_molecules(&molecules)
                .await
                .unwrap()
                .remove("m1")
                .unwrap()
        };

        let scheduler = QueueScheduler::new(nanny.clone());
        let meta = json!({
            "driver": "energy", "method": "hf", "basis": "sto-3g",
            "options": "default", "program": "psi4", "procedure": "single",
        });
        let data = json!([molecule_id]);
        let response = scheduler.submit("single", meta, data).await.unwrap();
        assert_eq!(response.meta.n_inserted, 1);
        assert!(response.meta.success);
        assert!(response.meta.errors.is_empty());
    }

    #[tokio::test]
    async fn queue_scheduler_rejects_unknown_procedure() {
        let nanny = make_nanny();
        let scheduler = QueueScheduler::new(nanny);
        let err = scheduler
            .submit("bogus", json!({}), json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownProcedure(_)));
    }

    #[tokio::test]
    async fn service_scheduler_registers_two_step_service() {
        let nanny = make_nanny();
        let services = Arc::new(crate::orchestration::services::builtin_registry());
        let molecule_id = {
            let mut molecules = BTreeMap::new();
            molecules.insert("m1".to_string(), json!({"symbols": ["O"]}));
            nanny
                .store()
                .add_molecules(&molecules)
                .await
                .unwrap()
                .remove("m1")
                .unwrap()
        };

        let scheduler = ServiceScheduler::new(nanny.clone(), services);
        let meta = json!({
            "kind": "two_step",
            "driver": "energy", "basis": "sto-3g", "options": "default", "program": "psi4",
        });
        let response = scheduler
            .submit(meta, vec![MoleculeRef::Id(molecule_id)])
            .await
            .unwrap();
        assert_eq!(response.meta.n_inserted, 1);
        assert_eq!(nanny.active_service_count().await, 1);
    }
}
