use std::sync::Arc;

use exchange_trait::ExchangeClient;
use market_core::Messenger;

use crate::approvals::ApprovalBook;
use crate::automation::ModeBook;
use crate::config::AgentConfig;
use crate::escalations::EscalationBook;
use crate::executor::OrderExecutor;
use crate::inventory::InventoryStore;
use crate::missed_log::MissedLog;

/// Everything the loops and the operator handler share. The books own all
/// mutable state; loops go through their typed APIs only.
pub struct AgentDeps {
    pub config: AgentConfig,
    pub exchange: Arc<dyn ExchangeClient>,
    pub messenger: Arc<dyn Messenger>,
    pub executor: OrderExecutor,
    pub inventory: Arc<InventoryStore>,
    pub approvals: ApprovalBook,
    pub escalations: EscalationBook,
    pub modes: ModeBook,
    pub missed: MissedLog,
}
