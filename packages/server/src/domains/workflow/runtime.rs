//! Workflow runtime: materialization, parent-success release, failure
//! cascade, and derived graph state.

use std::collections::{HashMap, HashSet, VecDeque};

use sqlx::PgPool;
use tracing::debug;

use crate::common::{crypto, ServerError};
use crate::domains::process::{Attribute, AttributeType, Process, ProcessState};
use crate::domains::workflow::graph::{derive_graph_state, ProcessGraph};
use crate::domains::workflow::spec::WorkflowSpec;

/// What changed as a consequence of closing a workflow member.
#[derive(Debug, Default)]
pub struct ClosedOutcome {
    /// Held children that became assignable.
    pub released: Vec<Process>,
    /// Descendants moved WAITING → FAILED by the cascade.
    pub cascade_failed: Vec<Process>,
    pub graph_state: Option<ProcessState>,
}

/// Materialize a workflow spec into a process graph.
///
/// Validates the spec, creates one WAITING process per function spec with
/// parent/child ID lists wired from the node-name dependencies, and inserts
/// graph and processes in a single transaction. Non-root processes are held
/// until all their parents succeed. `root_args` become numbered IN
/// attributes on every root process (used by generators).
pub async fn materialize(
    spec: &WorkflowSpec,
    root_args: &[String],
    initiator_id: &str,
    initiator_name: &str,
    pool: &PgPool,
) -> Result<(ProcessGraph, Vec<Process>), ServerError> {
    spec.validate()?;

    let graph_id = crypto::random_id();

    // One process per node, ids first so edges can be wired by name.
    let mut processes: Vec<Process> = spec
        .function_specs
        .iter()
        .map(|function_spec| {
            let mut function_spec = function_spec.clone();
            if function_spec.colony_name.is_empty() {
                function_spec.colony_name = spec.colony_name.clone();
            }
            let mut process = Process::from_spec(function_spec, initiator_id, initiator_name);
            process.processgraph_id = graph_id.clone();
            process
        })
        .collect();

    let id_by_node: HashMap<String, String> = processes
        .iter()
        .map(|p| (p.spec.node_name.clone(), p.id.clone()))
        .collect();

    let mut children_by_node: HashMap<String, Vec<String>> = HashMap::new();
    for process in &processes {
        for dep in &process.spec.conditions.dependencies {
            children_by_node
                .entry(dep.clone())
                .or_default()
                .push(process.id.clone());
        }
    }

    let mut root_process_ids = Vec::new();
    for process in &mut processes {
        process.parents = process
            .spec
            .conditions
            .dependencies
            .iter()
            .map(|dep| id_by_node[dep].clone())
            .collect();
        process.children = children_by_node
            .remove(&process.spec.node_name)
            .unwrap_or_default();

        if process.parents.is_empty() {
            root_process_ids.push(process.id.clone());
            for (i, arg) in root_args.iter().enumerate() {
                let key = if i == 0 {
                    "arg".to_string()
                } else {
                    format!("arg{i}")
                };
                process.in_attributes.push(Attribute::new(
                    &process.id,
                    &process.spec.colony_name,
                    AttributeType::In,
                    &key,
                    arg,
                ));
            }
        } else {
            process.wait_for_parents = true;
        }
    }

    let graph = ProcessGraph {
        id: graph_id,
        colony_name: spec.colony_name.clone(),
        state: ProcessState::Waiting,
        root_process_ids,
        process_ids: processes.iter().map(|p| p.id.clone()).collect(),
        submission_time: chrono::Utc::now(),
        start_time: None,
        end_time: None,
    };

    let mut tx = pool.begin().await?;
    graph.insert_tx(&mut tx).await?;
    for process in &processes {
        process.insert_tx(&mut tx).await?;
    }
    tx.commit().await?;

    debug!(
        processgraph_id = %graph.id,
        processes = graph.process_ids.len(),
        "workflow materialized"
    );
    Ok((graph, processes))
}

/// Apply graph consequences after a member process reached a terminal
/// state: release held children on success, cascade on failure, then
/// recompute the graph state.
pub async fn on_process_closed(
    process: &Process,
    closed_state: ProcessState,
    pool: &PgPool,
) -> Result<ClosedOutcome, ServerError> {
    let mut outcome = ClosedOutcome::default();
    if process.processgraph_id.is_empty() {
        return Ok(outcome);
    }

    let members = Process::find_by_graph(&process.processgraph_id, pool).await?;
    let by_id: HashMap<&str, &Process> = members.iter().map(|p| (p.id.as_str(), p)).collect();

    match closed_state {
        ProcessState::Success => {
            for child_id in &process.children {
                let Some(child) = by_id.get(child_id.as_str()) else {
                    continue;
                };
                if child.state != ProcessState::Waiting || !child.wait_for_parents {
                    continue;
                }
                let all_parents_done = child.parents.iter().all(|pid| {
                    // The closing process is SUCCESS; its row in `members`
                    // was read after the commit so it already reflects that.
                    by_id
                        .get(pid.as_str())
                        .is_some_and(|parent| parent.state == ProcessState::Success)
                });
                if all_parents_done {
                    Process::release_hold(child_id, pool).await?;
                    let mut released = (*child).clone();
                    released.wait_for_parents = false;
                    outcome.released.push(released);
                }
            }
        }
        ProcessState::Failed => {
            // Breadth-first over the child lists; descendants that are
            // already running are left to finish on their own.
            let mut queue: VecDeque<&str> =
                process.children.iter().map(String::as_str).collect();
            let mut seen: HashSet<&str> = HashSet::new();
            while let Some(id) = queue.pop_front() {
                if !seen.insert(id) {
                    continue;
                }
                let Some(descendant) = by_id.get(id) else {
                    continue;
                };
                if Process::fail_waiting(id, pool).await? {
                    Attribute::new(
                        id,
                        &descendant.spec.colony_name,
                        AttributeType::Err,
                        "error",
                        &format!("ancestor process <{}> failed", process.id),
                    )
                    .insert(pool)
                    .await?;
                    outcome.cascade_failed.push((*descendant).clone());
                }
                for child in &descendant.children {
                    queue.push_back(child.as_str());
                }
            }
        }
        _ => {}
    }

    outcome.graph_state = Some(update_graph_state(&process.processgraph_id, pool).await?);
    Ok(outcome)
}

/// Recompute and persist the derived state of a graph.
pub async fn update_graph_state(
    graph_id: &str,
    pool: &PgPool,
) -> Result<ProcessState, ServerError> {
    let states = sqlx::query_scalar::<_, ProcessState>(
        "SELECT state FROM processes WHERE processgraph_id = $1",
    )
    .bind(graph_id)
    .fetch_all(pool)
    .await?;

    let state = derive_graph_state(&states);
    ProcessGraph::update_state(graph_id, state, pool).await?;
    Ok(state)
}
