use std::path::Path;

use rentdesk_core::sync::SaveOutcome;
use rentdesk_core::{DatasetKind, Payload, SyncEngine};

use crate::commands::common::{
    format_entity_line, format_save_outcome, normalize_entity_id, read_json_input,
};
use crate::error::CliError;

pub async fn run_load(engine: &SyncEngine, kind: DatasetKind, as_json: bool) -> Result<(), CliError> {
    let Some(envelope) = engine.load(kind).await? else {
        if as_json {
            println!("null");
        } else {
            println!("No {kind} stored yet.");
        }
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    for entity in envelope.payload.entities() {
        println!("{}", format_entity_line(entity));
    }
    Ok(())
}

pub async fn run_save(
    engine: &SyncEngine,
    kind: DatasetKind,
    file: Option<&Path>,
) -> Result<(), CliError> {
    let payload = Payload::from_json(kind, read_json_input(file)?)?;
    let outcome = save_payload(engine, kind, payload).await?;
    println!("{}", format_save_outcome(&outcome));
    Ok(())
}

pub async fn save_payload(
    engine: &SyncEngine,
    kind: DatasetKind,
    payload: Payload,
) -> Result<SaveOutcome, CliError> {
    let entities = payload.len();
    let outcome = engine.save(kind, payload).await?;
    tracing::debug!(dataset = %kind, entities, "Saved from CLI input");
    Ok(outcome)
}

pub async fn run_delete(engine: &SyncEngine, kind: DatasetKind, id: &str) -> Result<(), CliError> {
    let id = normalize_entity_id(id)?;
    let outcome = engine.remove(kind, &id).await?;
    println!("{id}  {}", format_save_outcome(&outcome));
    Ok(())
}
