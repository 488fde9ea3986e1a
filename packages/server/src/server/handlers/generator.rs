use tracing::info;

use crate::common::ServerError;
use crate::domains::generator::Generator;
use crate::domains::workflow::WorkflowSpec;
use crate::kernel::security;
use crate::server::app::AppState;
use crate::server::handlers::{require_member_or_owner, HandlerResult};
use crate::server::messages::{
    AddGeneratorMsg, GetGeneratorMsg, GetGeneratorsMsg, PackGeneratorMsg, RemoveGeneratorMsg,
};

pub async fn add_generator(state: &AppState, caller: &str, msg: AddGeneratorMsg) -> HandlerResult {
    security::require_member(caller, &msg.generator.colony_name, &state.pool).await?;

    if msg.generator.name.is_empty() {
        return Err(ServerError::Validation(
            "generator name must not be empty".to_string(),
        ));
    }
    if msg.generator.trigger <= 0 {
        return Err(ServerError::Validation(
            "generator trigger must be positive".to_string(),
        ));
    }
    // The stored template must be a valid workflow.
    WorkflowSpec::parse(&msg.generator.workflow_spec)?.validate()?;

    let generator = Generator::new(
        msg.generator.colony_name,
        msg.generator.name,
        msg.generator.workflow_spec,
        msg.generator.trigger,
        msg.generator.timeout,
    );
    let generator = generator.insert(&state.pool).await?;
    info!(
        generator_id = %generator.id,
        generator_name = %generator.name,
        "generator added"
    );
    Ok(serde_json::to_value(generator)?)
}

pub async fn get_generator(state: &AppState, caller: &str, msg: GetGeneratorMsg) -> HandlerResult {
    let generator = find(state, &msg.generator_id).await?;
    require_member_or_owner(state, caller, &generator.colony_name).await?;
    Ok(serde_json::to_value(generator)?)
}

pub async fn get_generators(
    state: &AppState,
    caller: &str,
    msg: GetGeneratorsMsg,
) -> HandlerResult {
    require_member_or_owner(state, caller, &msg.colony_name).await?;
    let generators = Generator::find_by_colony(&msg.colony_name, msg.count, &state.pool).await?;
    Ok(serde_json::to_value(generators)?)
}

pub async fn pack_generator(
    state: &AppState,
    caller: &str,
    msg: PackGeneratorMsg,
) -> HandlerResult {
    let generator = find(state, &msg.generator_id).await?;
    security::require_member(caller, &generator.colony_name, &state.pool).await?;

    generator.pack(&msg.arg, &state.pool).await?;
    Ok(serde_json::json!({}))
}

pub async fn remove_generator(
    state: &AppState,
    caller: &str,
    msg: RemoveGeneratorMsg,
) -> HandlerResult {
    let generator = find(state, &msg.generator_id).await?;
    security::require_member(caller, &generator.colony_name, &state.pool).await?;
    Generator::remove(&generator.id, &state.pool).await?;
    info!(generator_id = %generator.id, "generator removed");
    Ok(serde_json::json!({}))
}

async fn find(state: &AppState, generator_id: &str) -> Result<Generator, ServerError> {
    Generator::find_by_id(generator_id, &state.pool)
        .await?
        .ok_or_else(|| {
            ServerError::NotFound(format!("generator <{generator_id}> does not exist"))
        })
}
