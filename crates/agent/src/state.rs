//! Shared agent state passed to every subsystem by construction.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nebo_domain::config::Config;
use nebo_domain::error::{Error, Result};
use nebo_protocol::{ApprovalRequestPayload, AskRequestPayload, Frame};
use nebo_providers::{ProfileTracker, ProviderRegistry};
use nebo_sessions::{RecoveryStore, SessionManager};
use nebo_skills::SkillRegistry;

use crate::comm::service::LoopService;
use crate::comm::CommState;
use crate::control::channel::FrameSender;
use crate::control::pending::{Approvals, Asks};
use crate::lanes::LaneManager;
use crate::runtime::advisors::Advisor;
use crate::runtime::policy::Policy;
use crate::runtime::runlog::RunLog;
use crate::runtime::tools::ToolRegistry;

/// Aggregate of every shared service. Cheap to clone; all fields are
/// behind `Arc`s.
#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<Config>,
    pub data_dir: PathBuf,

    // ── Scheduling ────────────────────────────────────────────────
    pub lanes: Arc<LaneManager>,
    pub run_log: Arc<RunLog>,

    // ── Persistence (shared with the local server) ────────────────
    pub sessions: Arc<SessionManager>,
    pub recovery: Arc<RecoveryStore>,
    /// Task ids currently being recovered, so a second scan does not
    /// double-enqueue work the first scan already re-admitted.
    pub recovery_inflight: Arc<parking_lot::Mutex<std::collections::HashSet<Uuid>>>,

    // ── Model access ──────────────────────────────────────────────
    pub providers: Arc<ProviderRegistry>,
    pub profiles: Arc<ProfileTracker>,
    pub advisors: Arc<Vec<Advisor>>,

    // ── Tools & policy ────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<Policy>,
    pub skills: Arc<SkillRegistry>,

    // ── Control channel ───────────────────────────────────────────
    pub approvals: Arc<Approvals>,
    pub asks: Arc<Asks>,
    sender: Arc<RwLock<Option<FrameSender>>>,

    // ── Comm ──────────────────────────────────────────────────────
    pub comm: Arc<CommState>,
    pub loop_service: Arc<dyn LoopService>,
}

impl AgentState {
    /// The current control-channel sender, if a session is live.
    pub fn sender(&self) -> Option<FrameSender> {
        self.sender.read().clone()
    }

    pub fn attach_sender(&self, sender: FrameSender) {
        *self.sender.write() = Some(sender);
    }

    pub fn detach_sender(&self) {
        *self.sender.write() = None;
    }

    /// Approval round-trip: register a pending entry, push an
    /// `approval_request` frame, and block on the response or the run's
    /// cancellation. An `always=true` answer records the canonical
    /// command in the policy allowlist.
    ///
    /// With no control channel attached there is nobody to ask; the call
    /// is denied.
    pub async fn request_approval(
        &self,
        cancel: &CancellationToken,
        tool_name: &str,
        input: &serde_json::Value,
    ) -> Result<bool> {
        let Some(sender) = self.sender() else {
            tracing::warn!(tool = tool_name, "no control channel; denying approval");
            return Ok(false);
        };

        let request_id = Uuid::new_v4().to_string();
        let rx = self.approvals.register(&request_id);

        sender
            .send(Frame::ApprovalRequest {
                id: request_id.clone(),
                payload: ApprovalRequestPayload {
                    request_id: request_id.clone(),
                    tool_name: tool_name.to_owned(),
                    input: input.clone(),
                },
            })
            .await?;

        let response = tokio::select! {
            resp = rx => resp,
            _ = cancel.cancelled() => {
                self.approvals.remove(&request_id);
                return Err(Error::Cancelled);
            }
        };

        match response {
            Ok(payload) => {
                if payload.approved && payload.always {
                    self.policy.allow_always(tool_name, input);
                }
                Ok(payload.approved)
            }
            // Sender dropped (channel torn down mid-wait).
            Err(_) => Err(Error::Channel("approval channel closed".into())),
        }
    }

    /// Ask round-trip: prompt the user through the UI and return their
    /// string answer. Widgets pass through as opaque JSON.
    pub async fn request_ask(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        widgets: Option<serde_json::Value>,
    ) -> Result<String> {
        let Some(sender) = self.sender() else {
            return Err(Error::Channel("no control channel for ask".into()));
        };

        let request_id = Uuid::new_v4().to_string();
        let rx = self.asks.register(&request_id);

        sender
            .send(Frame::AskRequest {
                id: request_id.clone(),
                payload: AskRequestPayload {
                    request_id: request_id.clone(),
                    prompt: prompt.to_owned(),
                    widgets,
                },
            })
            .await?;

        let response = tokio::select! {
            resp = rx => resp,
            _ = cancel.cancelled() => {
                self.asks.remove(&request_id);
                return Err(Error::Cancelled);
            }
        };

        match response {
            Ok(payload) => Ok(payload.value),
            Err(_) => Err(Error::Channel("ask channel closed".into())),
        }
    }

    /// The model a lane routes to by default, from configuration.
    pub fn lane_model(&self, lane: crate::lanes::Lane) -> Option<String> {
        let routing = &self.config.lanes.routing;
        match lane {
            crate::lanes::Lane::Heartbeat => routing.heartbeat_model.clone(),
            crate::lanes::Lane::Events => routing.events_model.clone(),
            crate::lanes::Lane::Comm => routing.comm_model.clone(),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builder-style constructor used by `main` and tests.
pub struct AgentStateBuilder {
    pub config: Config,
    pub data_dir: PathBuf,
    pub providers: ProviderRegistry,
    pub advisors: Vec<Advisor>,
    pub loop_service: Option<Arc<dyn LoopService>>,
}

impl AgentStateBuilder {
    pub fn new(config: Config, data_dir: PathBuf) -> Self {
        Self {
            config,
            data_dir,
            providers: ProviderRegistry::new(),
            advisors: Vec::new(),
            loop_service: None,
        }
    }

    pub fn build(self) -> Result<AgentState> {
        let config = Arc::new(self.config);
        let sessions = Arc::new(SessionManager::new(&self.data_dir)?);
        let recovery = Arc::new(RecoveryStore::new(&self.data_dir)?);
        let skills_root = self.data_dir.join("skills");
        let skills = Arc::new(SkillRegistry::load(&skills_root, &self.data_dir)?);
        let policy = Arc::new(Policy::from_config(&config.policy));
        let lanes = LaneManager::new(&config.lanes.caps);
        let loop_service = self.loop_service.unwrap_or_else(|| {
            Arc::new(crate::comm::service::HttpLoopService::from_config(&config.comm))
        });

        Ok(AgentState {
            config,
            data_dir: self.data_dir,
            lanes,
            run_log: Arc::new(RunLog::new()),
            sessions,
            recovery,
            recovery_inflight: Arc::new(parking_lot::Mutex::new(std::collections::HashSet::new())),
            providers: Arc::new(self.providers),
            profiles: Arc::new(ProfileTracker::new()),
            advisors: Arc::new(self.advisors),
            tools: Arc::new(ToolRegistry::new()),
            policy,
            skills,
            approvals: Arc::new(Approvals::new()),
            asks: Arc::new(Asks::new()),
            sender: Arc::new(RwLock::new(None)),
            comm: Arc::new(CommState::new()),
            loop_service,
        })
    }
}
