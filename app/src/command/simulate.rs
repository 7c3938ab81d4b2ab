//! Concurrent requests against one long-running conversation.
//!
//! Every simulated request runs on a blocking task because a held
//! conversation lock is tied to the thread that acquired it.

use std::sync::Arc;
use std::time::Duration;

use convctx_config::ConversationSettings;
use convctx_conversation::{ConversationContextManager, RequestBinding};
use convctx_core::TracingEventSink;
use convctx_session::{MemoryRequest, SessionManager};
use tracing::{debug, info};

const VISITS: &str = "visits";

/// Input parameters for the Simulate command strategy.
#[derive(Debug, Clone)]
pub struct SimulateInput {
    pub settings: ConversationSettings,
    /// Number of concurrent requests
    pub requests: usize,
    /// Time each request keeps its conversation active
    pub hold_ms: u64,
}

/// Outcome counts of one simulation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Requests that restored the shared conversation
    pub acquired: usize,
    /// Requests that timed out and continued with a transient conversation
    pub recovered: usize,
    /// Visit counter left in the shared conversation's store
    pub visits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acquired,
    Recovered,
}

/// Strategy for executing the Simulate command.
#[derive(Debug, Clone, Copy)]
pub struct SimulateStrategy;

impl super::CommandStrategy for SimulateStrategy {
    type Input = SimulateInput;

    async fn execute(&self, input: Self::Input) -> anyhow::Result<()> {
        let report = run(input).await?;

        println!("Acquired:  {}", report.acquired);
        println!("Recovered: {}", report.recovered);
        println!("Visits:    {}", report.visits);
        Ok(())
    }
}

async fn run(input: SimulateInput) -> anyhow::Result<SimulationReport> {
    let manager = Arc::new(ConversationContextManager::new(
        &input.settings,
        Arc::new(TracingEventSink),
    ));
    let sessions = Arc::new(SessionManager::new());
    let (session_id, cid) = {
        let manager = Arc::clone(&manager);
        let sessions = Arc::clone(&sessions);
        tokio::task::spawn_blocking(move || start_conversation(&manager, &sessions)).await??
    };
    info!(
        "Started conversation {} in session {}, sending {} requests",
        cid, session_id, input.requests
    );

    let hold = Duration::from_millis(input.hold_ms);
    let handles: Vec<_> = (0..input.requests)
        .map(|n| {
            let manager = Arc::clone(&manager);
            let sessions = Arc::clone(&sessions);
            let session_id = session_id.clone();
            let cid = cid.clone();
            tokio::task::spawn_blocking(move || {
                visit(&manager, sessions, &session_id, &cid, hold).inspect(|outcome| {
                    debug!("Request {} finished: {:?}", n, outcome);
                })
            })
        })
        .collect();

    let mut report = SimulationReport::default();
    for handle in handles {
        match handle.await?? {
            Outcome::Acquired => report.acquired += 1,
            Outcome::Recovered => report.recovered += 1,
        }
    }

    report.visits =
        tokio::task::spawn_blocking(move || read_visits(&manager, sessions, &session_id, &cid))
            .await??;
    Ok(report)
}

/// Creates a session with one long-running conversation holding a zeroed
/// visit counter.
fn start_conversation(
    manager: &ConversationContextManager,
    sessions: &Arc<SessionManager>,
) -> anyhow::Result<(String, String)> {
    let request = Arc::new(MemoryRequest::new(Arc::clone(sessions)));
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, request.clone())?;
    manager.activate(&mut binding, None)?;

    let conversation = manager.current_conversation(&binding)?;
    conversation.begin();
    if let Some(store) = binding.store() {
        store.put(VISITS, 0_u64);
    }
    manager.deactivate(&mut binding)?;
    manager.dissociate(&mut binding);

    let session_id = request
        .session_id()
        .ok_or_else(|| anyhow::anyhow!("Conversation was not promoted into a session"))?;
    Ok((session_id, conversation.id().to_string()))
}

fn visit(
    manager: &ConversationContextManager,
    sessions: Arc<SessionManager>,
    session_id: &str,
    cid: &str,
    hold: Duration,
) -> anyhow::Result<Outcome> {
    let request = Arc::new(MemoryRequest::with_session(sessions, session_id));
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, request)?;

    let outcome = match manager.activate(&mut binding, Some(cid)) {
        Ok(()) => Outcome::Acquired,
        Err(e) if e.is_recovered() || binding.is_active() => {
            debug!("Continuing with a transient conversation: {e}");
            Outcome::Recovered
        }
        Err(e) => return Err(e.into()),
    };

    if let (Outcome::Acquired, Some(store)) = (outcome, binding.store()) {
        let visits = store.get::<u64>(VISITS)?.map_or(0, |v| *v);
        store.put(VISITS, visits + 1);
    }
    std::thread::sleep(hold);

    manager.deactivate(&mut binding)?;
    manager.dissociate(&mut binding);
    Ok(outcome)
}

fn read_visits(
    manager: &ConversationContextManager,
    sessions: Arc<SessionManager>,
    session_id: &str,
    cid: &str,
) -> anyhow::Result<u64> {
    let request = Arc::new(MemoryRequest::with_session(sessions, session_id));
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, request)?;
    manager.activate(&mut binding, Some(cid))?;

    let visits = binding
        .store()
        .map(|store| store.get::<u64>(VISITS))
        .transpose()?
        .flatten()
        .map_or(0, |v| *v);

    manager.deactivate(&mut binding)?;
    manager.dissociate(&mut binding);
    Ok(visits)
}
