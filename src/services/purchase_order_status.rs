use crate::{auth::Role, models::purchase_order::PurchaseOrderStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProcurementAction {
    Create,
    Quote,
    Approve,
    Reject,
    Supply,
}

impl ProcurementAction {
    /// Role allowed to perform the action.
    pub fn role(self) -> Role {
        match self {
            Self::Create => Role::Supervisor,
            Self::Quote | Self::Supply => Role::Vendor,
            Self::Approve | Self::Reject => Role::Admin,
        }
    }
}

/// Result of looking up `(role, action, current state)` in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The row moves to the given state.
    To(PurchaseOrderStatus),
    /// A supply that leaves the row `Approved` when units remain and
    /// `Delivered` when the remaining quantity reaches zero.
    Fulfil,
    /// The role may not perform the action at all.
    Forbidden,
    /// The role may act, but not from the current state.
    Invalid,
}

/// The procurement state machine.
///
/// `current` is `None` for `Create`, which has no prior row.
pub fn transition(
    role: Role,
    action: ProcurementAction,
    current: Option<PurchaseOrderStatus>,
) -> Transition {
    use PurchaseOrderStatus::*;

    if role != action.role() {
        return Transition::Forbidden;
    }

    match (action, current) {
        (ProcurementAction::Create, None) => Transition::To(Requested),
        (ProcurementAction::Quote, Some(Requested | Quoted | Rejected)) => Transition::To(Quoted),
        (ProcurementAction::Approve, Some(Quoted)) => Transition::To(Approved),
        (ProcurementAction::Reject, Some(Requested | Quoted | Approved)) => {
            Transition::To(Rejected)
        }
        (ProcurementAction::Supply, Some(Approved)) => Transition::Fulfil,
        _ => Transition::Invalid,
    }
}

/// Status after supplying units out of `remaining`.
pub fn status_after_supply(remaining: i32) -> PurchaseOrderStatus {
    if remaining == 0 {
        PurchaseOrderStatus::Delivered
    } else {
        PurchaseOrderStatus::Approved
    }
}
