use crate::{
    auth::{Actor, Role},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        asset::{self, AssetType},
        purchase_order::{self, PurchaseOrderStatus},
    },
    services::{
        assets::{self, TemplateOverrides},
        purchase_order_status::{self, ProcurementAction, Transition},
        reference::{ReferenceData, RegistrationRegistry},
    },
    PaginatedResponse,
};
use chrono::{NaiveDate, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Condition, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};
use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// New requirement raised by a supervisor.
#[derive(Debug, Clone)]
pub struct CreatePurchaseOrder {
    pub asset_name: String,
    pub quantity: i32,
    /// Binds the order to one vendor; `None` broadcasts it to every vendor of the org.
    pub vendor_id: Option<Uuid>,
}

/// Units delivered by the bound vendor against an approved order.
#[derive(Debug, Clone, Default)]
pub struct SupplyAssets {
    pub quantity: i32,
    /// `Hardware` or `Software`; inherited from earlier assets of the same name when absent.
    pub asset_type: Option<String>,
    pub category_id: Option<i32>,
    pub location_id: Option<i32>,
    pub room_id: Option<i32>,
    pub purchase_date: Option<NaiveDate>,
    pub warranty_expiry: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct SupplyOutcome {
    pub order: purchase_order::Model,
    pub assets: Vec<asset::Model>,
    pub remaining: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct PurchaseOrderFilter {
    pub status: Option<PurchaseOrderStatus>,
    /// 1-based
    pub page: u64,
    pub per_page: u64,
}

/// Drives the purchase-order lifecycle for supervisors, vendors and admins.
#[derive(Clone)]
pub struct ProcurementService {
    db: Arc<DatabaseConnection>,
    reference: Arc<dyn ReferenceData>,
    registry: Arc<dyn RegistrationRegistry>,
    event_sender: Arc<EventSender>,
    transaction_timeout: Duration,
}

impl ProcurementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        reference: Arc<dyn ReferenceData>,
        registry: Arc<dyn RegistrationRegistry>,
        event_sender: Arc<EventSender>,
        transaction_timeout: Duration,
    ) -> Self {
        Self {
            db,
            reference,
            registry,
            event_sender,
            transaction_timeout,
        }
    }

    /// Raises a new requirement in `Requested`.
    #[instrument(skip(self, command), fields(actor_id = %actor.id, asset_name = %command.asset_name))]
    pub async fn create_purchase_order(
        &self,
        actor: &Actor,
        command: CreatePurchaseOrder,
    ) -> Result<purchase_order::Model, ServiceError> {
        let target = allowed(actor, ProcurementAction::Create, None)?;

        let asset_name = command.asset_name.trim().to_string();
        if asset_name.is_empty() {
            return Err(ServiceError::ValidationError(
                "asset name must not be empty".to_string(),
            ));
        }
        if command.quantity < 1 {
            return Err(ServiceError::InvalidQuantity(format!(
                "requested quantity must be at least 1, got {}",
                command.quantity
            )));
        }
        if let Some(vendor_id) = command.vendor_id {
            if !self.reference.user_exists(vendor_id).await? {
                return Err(ServiceError::NotFound(format!(
                    "Vendor {} not found",
                    vendor_id
                )));
            }
        }

        let now = Utc::now();
        let order = purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            correlation_id: Set(Uuid::new_v4()),
            org_id: Set(actor.org_id),
            supervisor_id: Set(actor.id),
            vendor_id: Set(command.vendor_id),
            asset_name: Set(asset_name),
            quantity: Set(command.quantity),
            quote: Set(None),
            status: Set(target),
            admin_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let db = self.db.clone();
        let created = self
            .bounded(ProcurementAction::Create, async move {
                Ok(order.insert(&*db).await?)
            })
            .await?;

        info!(order_id = %created.id, correlation_id = %created.correlation_id, "Purchase order created");
        self.record(ProcurementAction::Create);
        self.event_sender.publish(Event::PurchaseOrderCreated {
            order_id: created.id,
            correlation_id: created.correlation_id,
            supervisor_id: created.supervisor_id,
            vendor_id: created.vendor_id,
            asset_name: created.asset_name.clone(),
            quantity: created.quantity,
        });

        Ok(created)
    }

    /// Records a vendor's quote.
    ///
    /// Quoting a broadcast request creates (or updates) the vendor's own row for
    /// the requirement; the broadcast row itself is never modified.
    #[instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn submit_quote(
        &self,
        actor: &Actor,
        order_id: Uuid,
        quote: Decimal,
    ) -> Result<purchase_order::Model, ServiceError> {
        actor.require(Role::Vendor)?;
        if quote <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "quote must be a positive amount".to_string(),
            ));
        }

        let order = self.find_order(order_id).await?;
        if let Some(vendor_id) = order.vendor_id {
            if vendor_id != actor.id {
                return Err(ServiceError::Forbidden(
                    "purchase order is bound to another vendor".to_string(),
                ));
            }
        }
        check_quotable(actor, &order)?;
        if !self.registry.is_registered(actor.id, order.org_id).await? {
            return Err(ServiceError::Forbidden(format!(
                "vendor is not registered with organization {}",
                order.org_id
            )));
        }

        let db = self.db.clone();
        let vendor = *actor;
        let correlation_id = order.correlation_id;
        let quoted = self
            .bounded(ProcurementAction::Quote, async move {
                let txn = db.begin().await?;

                lock_requirement(&txn, correlation_id).await?;
                let locked = lock_order(&txn, order_id).await?;
                check_quotable(&vendor, &locked)?;
                if sibling_has_won(&txn, locked.correlation_id, None).await? {
                    return Err(ServiceError::InvalidTransition(
                        "requirement has already been awarded".to_string(),
                    ));
                }

                let now = Utc::now();
                let saved = if locked.is_broadcast() {
                    let existing = purchase_order::Entity::find()
                        .filter(purchase_order::Column::CorrelationId.eq(locked.correlation_id))
                        .filter(purchase_order::Column::VendorId.eq(vendor.id))
                        .lock_exclusive()
                        .one(&txn)
                        .await?;

                    match existing {
                        Some(own) => {
                            check_quotable(&vendor, &own)?;
                            let mut active: purchase_order::ActiveModel = own.into();
                            active.quote = Set(Some(quote));
                            active.status = Set(PurchaseOrderStatus::Quoted);
                            active.updated_at = Set(now);
                            active.update(&txn).await?
                        }
                        None => purchase_order::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            correlation_id: Set(locked.correlation_id),
                            org_id: Set(locked.org_id),
                            supervisor_id: Set(locked.supervisor_id),
                            vendor_id: Set(Some(vendor.id)),
                            asset_name: Set(locked.asset_name.clone()),
                            quantity: Set(locked.quantity),
                            quote: Set(Some(quote)),
                            status: Set(PurchaseOrderStatus::Quoted),
                            admin_id: Set(None),
                            created_at: Set(locked.created_at),
                            updated_at: Set(now),
                        }
                        .insert(&txn)
                        .await
                        .map_err(|e| match e.sql_err() {
                            Some(SqlErr::UniqueConstraintViolation(_)) => {
                                ServiceError::InvalidTransition(
                                    "a quote from this vendor was submitted concurrently"
                                        .to_string(),
                                )
                            }
                            _ => ServiceError::DatabaseError(e),
                        })?,
                    }
                } else {
                    let mut active: purchase_order::ActiveModel = locked.into();
                    active.quote = Set(Some(quote));
                    active.status = Set(PurchaseOrderStatus::Quoted);
                    active.updated_at = Set(now);
                    active.update(&txn).await?
                };

                txn.commit().await?;
                Ok(saved)
            })
            .await?;

        info!(order_id = %quoted.id, quote = %quote, "Quote submitted");
        self.record(ProcurementAction::Quote);
        self.event_sender.publish(Event::QuoteSubmitted {
            order_id: quoted.id,
            correlation_id: quoted.correlation_id,
            vendor_id: actor.id,
            quote,
        });

        Ok(quoted)
    }

    /// Awards the requirement to one quoted row and rejects its competitors.
    #[instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn approve_purchase_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        actor.require(Role::Admin)?;
        let order = self.find_order(order_id).await?;
        ensure_same_org(actor, &order)?;
        allowed(actor, ProcurementAction::Approve, Some(order.status))?;

        let db = self.db.clone();
        let admin_id = actor.id;
        let correlation_id = order.correlation_id;
        let (approved, rejected) = self
            .bounded(ProcurementAction::Approve, async move {
                let txn = db.begin().await?;

                // Same lock order as quoting: requirement first, then the row.
                lock_requirement(&txn, correlation_id).await?;
                let locked = lock_order(&txn, order_id).await?;
                let target = transition_error(
                    purchase_order_status::transition(
                        Role::Admin,
                        ProcurementAction::Approve,
                        Some(locked.status),
                    ),
                    locked.status,
                )?;
                if sibling_has_won(&txn, locked.correlation_id, Some(order_id)).await? {
                    return Err(ServiceError::InvalidTransition(
                        "another quote for this requirement was already approved".to_string(),
                    ));
                }

                let now = Utc::now();
                let mut active: purchase_order::ActiveModel = locked.into();
                active.status = Set(target);
                active.admin_id = Set(Some(admin_id));
                active.updated_at = Set(now);
                let approved = active.update(&txn).await?;

                let rejected = purchase_order::Entity::update_many()
                    .set(purchase_order::ActiveModel {
                        status: Set(PurchaseOrderStatus::Rejected),
                        updated_at: Set(now),
                        ..Default::default()
                    })
                    .filter(purchase_order::Column::CorrelationId.eq(correlation_id))
                    .filter(purchase_order::Column::Id.ne(order_id))
                    .filter(
                        Condition::any()
                            .add(
                                Condition::all()
                                    .add(purchase_order::Column::VendorId.is_null())
                                    .add(
                                        purchase_order::Column::Status
                                            .eq(PurchaseOrderStatus::Requested),
                                    ),
                            )
                            .add(purchase_order::Column::Status.eq(PurchaseOrderStatus::Quoted)),
                    )
                    .exec(&txn)
                    .await?
                    .rows_affected;

                txn.commit().await?;
                Ok((approved, rejected))
            })
            .await?;

        info!(order_id = %approved.id, rejected_siblings = rejected, "Purchase order approved");
        self.record(ProcurementAction::Approve);
        self.event_sender.publish(Event::PurchaseOrderApproved {
            order_id: approved.id,
            correlation_id: approved.correlation_id,
            admin_id: actor.id,
        });
        if rejected > 0 {
            self.event_sender.publish(Event::SiblingQuotesRejected {
                correlation_id: approved.correlation_id,
                winner_id: approved.id,
                rejected,
            });
        }

        Ok(approved)
    }

    #[instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn reject_purchase_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        actor.require(Role::Admin)?;
        let order = self.find_order(order_id).await?;
        ensure_same_org(actor, &order)?;
        allowed(actor, ProcurementAction::Reject, Some(order.status))?;

        let db = self.db.clone();
        let admin_id = actor.id;
        let rejected = self
            .bounded(ProcurementAction::Reject, async move {
                let txn = db.begin().await?;

                let locked = lock_order(&txn, order_id).await?;
                let target = transition_error(
                    purchase_order_status::transition(
                        Role::Admin,
                        ProcurementAction::Reject,
                        Some(locked.status),
                    ),
                    locked.status,
                )?;

                let mut active: purchase_order::ActiveModel = locked.into();
                active.status = Set(target);
                active.admin_id = Set(Some(admin_id));
                active.updated_at = Set(Utc::now());
                let rejected = active.update(&txn).await?;

                txn.commit().await?;
                Ok(rejected)
            })
            .await?;

        info!(order_id = %rejected.id, "Purchase order rejected");
        self.record(ProcurementAction::Reject);
        self.event_sender.publish(Event::PurchaseOrderRejected {
            order_id: rejected.id,
            admin_id: actor.id,
        });

        Ok(rejected)
    }

    /// Supplies units against an approved order.
    ///
    /// The order row is locked for the whole unit: serial allocation, asset inserts
    /// and the quantity decrement commit together or not at all.
    #[instrument(skip(self, command), fields(actor_id = %actor.id, quantity = command.quantity))]
    pub async fn supply_assets(
        &self,
        actor: &Actor,
        order_id: Uuid,
        command: SupplyAssets,
    ) -> Result<SupplyOutcome, ServiceError> {
        actor.require(Role::Vendor)?;
        let order = self.find_order(order_id).await?;
        if !order.is_bound_to(actor.id) {
            return Err(ServiceError::Forbidden(
                "only the vendor bound to this purchase order may supply it".to_string(),
            ));
        }
        allowed(actor, ProcurementAction::Supply, Some(order.status))?;

        if command.quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(
                "supply quantity must be positive".to_string(),
            ));
        }
        if command.quantity > order.quantity {
            return Err(ServiceError::InvalidQuantity(format!(
                "supply quantity {} exceeds remaining quantity {}",
                command.quantity, order.quantity
            )));
        }
        let asset_type = command
            .asset_type
            .as_deref()
            .map(parse_asset_type)
            .transpose()?;
        self.check_placement(&command).await?;

        let overrides = TemplateOverrides {
            asset_type,
            category_id: command.category_id,
            location_id: command.location_id,
            room_id: command.room_id,
            purchase_date: command.purchase_date,
            warranty_expiry: command.warranty_expiry,
        };
        let requested = command.quantity;
        let supplier_id = actor.id;
        let db = self.db.clone();

        let result = self
            .bounded(ProcurementAction::Supply, async move {
                let txn = db.begin().await?;
                let done = supply_locked(&txn, order_id, requested, overrides, supplier_id).await?;
                txn.commit().await?;
                Ok(done)
            })
            .await;

        let (updated, created) = match result {
            Ok(done) => done,
            Err(e) => {
                counter!("asset_tracker.procurement.supply_rollbacks", 1);
                error!(order_id = %order_id, error = %e, "Supply rolled back");
                return Err(e);
            }
        };

        let remaining = updated.quantity;
        let message = if remaining == 0 {
            format!("Supplied {} assets; purchase order delivered", requested)
        } else {
            format!(
                "Supplied {} assets; {} remaining to be supplied",
                requested, remaining
            )
        };
        info!(order_id = %order_id, supplied = requested, remaining, "Assets supplied");

        self.record(ProcurementAction::Supply);
        self.event_sender.publish(Event::PurchaseOrderSupplied {
            order_id,
            vendor_id: actor.id,
            supplied: requested,
            remaining,
            first_serial: created
                .first()
                .map(|a| a.serial_number.clone())
                .unwrap_or_default(),
            last_serial: created
                .last()
                .map(|a| a.serial_number.clone())
                .unwrap_or_default(),
        });
        if updated.status == PurchaseOrderStatus::Delivered {
            self.event_sender.publish(Event::PurchaseOrderDelivered {
                order_id,
                vendor_id: actor.id,
                delivered_at: updated.updated_at,
            });
        }

        Ok(SupplyOutcome {
            order: updated,
            assets: created,
            remaining,
            message,
        })
    }

    /// Fetches one order if the actor may see it.
    #[instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn get_purchase_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self.find_order(order_id).await?;
        if self.can_view(actor, &order).await? {
            Ok(order)
        } else {
            Err(not_found(order_id))
        }
    }

    /// Lists visible orders, newest first.
    #[instrument(skip(self, filter), fields(actor_id = %actor.id))]
    pub async fn list_purchase_orders(
        &self,
        actor: &Actor,
        filter: PurchaseOrderFilter,
    ) -> Result<PaginatedResponse<purchase_order::Model>, ServiceError> {
        let visibility = match actor.role {
            Role::Supervisor => {
                Condition::all().add(purchase_order::Column::SupervisorId.eq(actor.id))
            }
            Role::Admin => Condition::all().add(purchase_order::Column::OrgId.eq(actor.org_id)),
            Role::Vendor => {
                let orgs = self.registry.organizations_for(actor.id).await?;
                Condition::any()
                    .add(purchase_order::Column::VendorId.eq(actor.id))
                    .add(
                        Condition::all()
                            .add(purchase_order::Column::VendorId.is_null())
                            .add(purchase_order::Column::OrgId.is_in(orgs)),
                    )
            }
        };

        let mut query = purchase_order::Entity::find().filter(visibility);
        if let Some(status) = filter.status {
            query = query.filter(purchase_order::Column::Status.eq(status));
        }

        let page = filter.page.max(1);
        let per_page = filter.per_page.max(1);
        let paginator = query
            .order_by_desc(purchase_order::Column::CreatedAt)
            .order_by_asc(purchase_order::Column::Id)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(PaginatedResponse {
            items,
            total,
            page,
            limit: per_page,
            total_pages: total.div_ceil(per_page),
        })
    }

    /// Every row of the order's requirement: the broadcast row and each vendor's quote.
    #[instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn list_quotes(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<purchase_order::Model>, ServiceError> {
        let order = self.find_order(order_id).await?;
        match actor.role {
            Role::Vendor => {
                return Err(ServiceError::Forbidden(
                    "vendors cannot list competing quotes".to_string(),
                ))
            }
            Role::Supervisor if order.supervisor_id != actor.id => {
                return Err(not_found(order_id))
            }
            Role::Admin if order.org_id != actor.org_id => return Err(not_found(order_id)),
            _ => {}
        }

        Ok(purchase_order::Entity::find()
            .filter(purchase_order::Column::CorrelationId.eq(order.correlation_id))
            .order_by_asc(purchase_order::Column::UpdatedAt)
            .order_by_asc(purchase_order::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Assets created by supplying this order row.
    #[instrument(skip(self), fields(actor_id = %actor.id))]
    pub async fn list_order_assets(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<Vec<asset::Model>, ServiceError> {
        let order = self.find_order(order_id).await?;
        let visible = match actor.role {
            Role::Supervisor => order.supervisor_id == actor.id,
            Role::Vendor => order.is_bound_to(actor.id),
            Role::Admin => order.org_id == actor.org_id,
        };
        if !visible {
            return Err(not_found(order_id));
        }

        Ok(asset::Entity::find()
            .filter(asset::Column::PurchaseOrderId.eq(order_id))
            .order_by_asc(asset::Column::CreatedAt)
            .order_by_asc(asset::Column::SerialNumber)
            .all(&*self.db)
            .await?)
    }

    async fn find_order(&self, order_id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        purchase_order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| not_found(order_id))
    }

    async fn can_view(
        &self,
        actor: &Actor,
        order: &purchase_order::Model,
    ) -> Result<bool, ServiceError> {
        Ok(match actor.role {
            Role::Supervisor => order.supervisor_id == actor.id,
            Role::Admin => order.org_id == actor.org_id,
            Role::Vendor if order.is_bound_to(actor.id) => true,
            Role::Vendor if order.is_broadcast() => {
                self.registry.is_registered(actor.id, order.org_id).await?
            }
            Role::Vendor => false,
        })
    }

    async fn check_placement(&self, command: &SupplyAssets) -> Result<(), ServiceError> {
        if let Some(id) = command.category_id {
            if !self.reference.category_exists(id).await? {
                return Err(ServiceError::NotFound(format!("Category {} not found", id)));
            }
        }
        if let Some(id) = command.location_id {
            if !self.reference.location_exists(id).await? {
                return Err(ServiceError::NotFound(format!("Location {} not found", id)));
            }
        }
        if let Some(id) = command.room_id {
            if !self.reference.room_exists(id).await? {
                return Err(ServiceError::NotFound(format!("Room {} not found", id)));
            }
        }
        Ok(())
    }

    /// Runs one transactional unit under the configured deadline. Dropping the
    /// future on timeout drops its transaction, which rolls it back.
    async fn bounded<T, F>(&self, action: ProcurementAction, work: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.transaction_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    action = %action,
                    timeout_secs = self.transaction_timeout.as_secs_f64(),
                    "Transaction timed out and was rolled back"
                );
                Err(ServiceError::PersistenceFailure(format!(
                    "{} timed out after {:?}",
                    action, self.transaction_timeout
                )))
            }
        };

        histogram!(
            "asset_tracker.procurement.transaction_ms",
            start.elapsed().as_secs_f64() * 1000.0,
            "action" => action.to_string()
        );
        result
    }

    fn record(&self, action: ProcurementAction) {
        counter!("asset_tracker.procurement.transitions", 1, "action" => action.to_string());
    }
}

fn not_found(order_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Purchase order {} not found", order_id))
}

fn ensure_same_org(actor: &Actor, order: &purchase_order::Model) -> Result<(), ServiceError> {
    if actor.org_id == order.org_id {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "purchase order belongs to another organization".to_string(),
        ))
    }
}

/// Looks the triple up in the transition table and returns the target state.
fn allowed(
    actor: &Actor,
    action: ProcurementAction,
    current: Option<PurchaseOrderStatus>,
) -> Result<PurchaseOrderStatus, ServiceError> {
    match purchase_order_status::transition(actor.role, action, current) {
        Transition::Forbidden => Err(ServiceError::Forbidden(format!(
            "{} may not {} purchase orders",
            actor.role, action
        ))),
        other => transition_error(other, current.unwrap_or(PurchaseOrderStatus::Requested)),
    }
}

fn transition_error(
    transition: Transition,
    current: PurchaseOrderStatus,
) -> Result<PurchaseOrderStatus, ServiceError> {
    match transition {
        Transition::To(target) => Ok(target),
        Transition::Fulfil => Ok(PurchaseOrderStatus::Approved),
        Transition::Invalid => Err(ServiceError::InvalidTransition(format!(
            "not allowed while purchase order is {}",
            current
        ))),
        Transition::Forbidden => Err(ServiceError::Forbidden(
            "action not permitted for this role".to_string(),
        )),
    }
}

fn parse_asset_type(raw: &str) -> Result<AssetType, ServiceError> {
    raw.trim().parse::<AssetType>().map_err(|_| {
        ServiceError::InvalidAssetType(format!(
            "asset type must be Hardware or Software, got '{}'",
            raw
        ))
    })
}

/// A vendor may quote a broadcast row only while it is still open, and its own
/// row from any non-won state.
fn check_quotable(actor: &Actor, order: &purchase_order::Model) -> Result<(), ServiceError> {
    if order.is_broadcast() && order.status != PurchaseOrderStatus::Requested {
        return Err(ServiceError::InvalidTransition(format!(
            "broadcast request is {} and no longer accepts quotes",
            order.status
        )));
    }
    allowed(actor, ProcurementAction::Quote, Some(order.status)).map(|_| ())
}

async fn lock_order<C>(conn: &C, order_id: Uuid) -> Result<purchase_order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    purchase_order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| not_found(order_id))
}

/// Locks the broadcast row of a requirement. Quote and approve take this lock
/// before any other, so they serialize per requirement. Requirements raised for
/// a single vendor have no broadcast row and serialize on that row alone.
async fn lock_requirement<C>(
    conn: &C,
    correlation_id: Uuid,
) -> Result<Option<purchase_order::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(purchase_order::Entity::find()
        .filter(purchase_order::Column::CorrelationId.eq(correlation_id))
        .filter(purchase_order::Column::VendorId.is_null())
        .lock_exclusive()
        .one(conn)
        .await?)
}

/// Supply under the order's row lock: re-checks state and remaining quantity,
/// materializes the units and decrements the order. The caller owns the
/// transaction and commits it.
async fn supply_locked<C>(
    conn: &C,
    order_id: Uuid,
    requested: i32,
    overrides: TemplateOverrides,
    supplier_id: Uuid,
) -> Result<(purchase_order::Model, Vec<asset::Model>), ServiceError>
where
    C: ConnectionTrait,
{
    let count = u32::try_from(requested)
        .ok()
        .filter(|count| *count > 0)
        .ok_or_else(|| {
            ServiceError::InvalidQuantity("supply quantity must be positive".to_string())
        })?;

    let locked = lock_order(conn, order_id).await?;
    if locked.status != PurchaseOrderStatus::Approved || requested > locked.quantity {
        warn!(
            status = %locked.status,
            remaining = locked.quantity,
            requested,
            "Purchase order changed before supply acquired the lock"
        );
        return Err(ServiceError::ConcurrentModification(order_id));
    }

    let previous = assets::latest_asset_named(conn, locked.org_id, &locked.asset_name).await?;
    let template = assets::resolve_template(
        locked.org_id,
        &locked.asset_name,
        overrides,
        previous.as_ref(),
        Utc::now().date_naive(),
    )?;
    let created = assets::materialize(conn, &template, count, supplier_id, order_id).await?;

    let remaining = locked.quantity - requested;
    let mut active: purchase_order::ActiveModel = locked.into();
    active.quantity = Set(remaining);
    active.status = Set(purchase_order_status::status_after_supply(remaining));
    active.updated_at = Set(Utc::now());
    let updated = active.update(conn).await?;

    Ok((updated, created))
}

async fn sibling_has_won<C>(
    conn: &C,
    correlation_id: Uuid,
    excluding: Option<Uuid>,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = purchase_order::Entity::find()
        .select_only()
        .column(purchase_order::Column::Status)
        .filter(purchase_order::Column::CorrelationId.eq(correlation_id));
    if let Some(id) = excluding {
        query = query.filter(purchase_order::Column::Id.ne(id));
    }
    let statuses: Vec<PurchaseOrderStatus> = query.into_tuple().all(conn).await?;
    Ok(statuses.into_iter().any(PurchaseOrderStatus::is_won))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn order(vendor_id: Option<Uuid>, status: PurchaseOrderStatus) -> purchase_order::Model {
        let now = Utc::now();
        purchase_order::Model {
            id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            org_id: 1,
            supervisor_id: Uuid::new_v4(),
            vendor_id,
            asset_name: "Laptop".to_string(),
            quantity: 5,
            quote: None,
            status,
            admin_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn stored(row: &purchase_order::Model) -> purchase_order::ActiveModel {
        purchase_order::ActiveModel {
            id: Set(row.id),
            correlation_id: Set(row.correlation_id),
            org_id: Set(row.org_id),
            supervisor_id: Set(row.supervisor_id),
            vendor_id: Set(row.vendor_id),
            asset_name: Set(row.asset_name.clone()),
            quantity: Set(row.quantity),
            quote: Set(row.quote),
            status: Set(row.status),
            admin_id: Set(row.admin_id),
            created_at: Set(row.created_at),
            updated_at: Set(row.updated_at),
        }
    }

    async fn migrated_db() -> DatabaseConnection {
        let db = crate::db::establish_connection_with_config(&crate::db::DbConfig {
            url: "sqlite::memory:".to_string(),
            sqlx_logging: false,
            ..Default::default()
        })
        .await
        .unwrap();
        crate::db::run_migrations(&db).await.unwrap();
        db
    }

    fn hardware() -> TemplateOverrides {
        TemplateOverrides {
            asset_type: Some(AssetType::Hardware),
            ..Default::default()
        }
    }

    /// Approved order with three units, as every supply pre-check saw it.
    async fn approved_order(db: &DatabaseConnection, vendor: Uuid) -> purchase_order::Model {
        let mut row = order(Some(vendor), PurchaseOrderStatus::Approved);
        row.quantity = 3;
        stored(&row).insert(db).await.unwrap()
    }

    #[tokio::test]
    async fn supply_after_quantity_shrank_under_it_is_a_concurrent_modification() {
        let db = migrated_db().await;
        let vendor = Uuid::new_v4();
        let seen = approved_order(&db, vendor).await;

        // Another supply took two units between the pre-check and the lock.
        let mut active: purchase_order::ActiveModel = seen.clone().into();
        active.quantity = Set(1);
        active.update(&db).await.unwrap();

        let txn = db.begin().await.unwrap();
        let err = supply_locked(&txn, seen.id, 2, hardware(), vendor)
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();
        assert_matches!(err, ServiceError::ConcurrentModification(id) if id == seen.id);

        assert_eq!(asset::Entity::find().count(&db).await.unwrap(), 0);
        let current = purchase_order::Entity::find_by_id(seen.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.quantity, 1);
        assert_eq!(current.status, PurchaseOrderStatus::Approved);
    }

    #[tokio::test]
    async fn supply_after_order_was_rejected_under_it_is_a_concurrent_modification() {
        let db = migrated_db().await;
        let vendor = Uuid::new_v4();
        let seen = approved_order(&db, vendor).await;

        let mut active: purchase_order::ActiveModel = seen.clone().into();
        active.status = Set(PurchaseOrderStatus::Rejected);
        active.update(&db).await.unwrap();

        let txn = db.begin().await.unwrap();
        let err = supply_locked(&txn, seen.id, 1, hardware(), vendor)
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();
        assert_matches!(err, ServiceError::ConcurrentModification(_));
        assert_eq!(asset::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn supply_under_lock_decrements_and_delivers() {
        let db = migrated_db().await;
        let vendor = Uuid::new_v4();
        let seen = approved_order(&db, vendor).await;

        let txn = db.begin().await.unwrap();
        let (partial, first) = supply_locked(&txn, seen.id, 2, hardware(), vendor)
            .await
            .unwrap();
        let (delivered, last) = supply_locked(&txn, seen.id, 1, hardware(), vendor)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(partial.quantity, 1);
        assert_eq!(partial.status, PurchaseOrderStatus::Approved);
        assert_eq!(delivered.quantity, 0);
        assert_eq!(delivered.status, PurchaseOrderStatus::Delivered);
        assert_eq!(first[0].serial_number, "LAPTOP-L-HW-0-0/0001");
        assert_eq!(last[0].serial_number, "LAPTOP-L-HW-0-0/0003");
    }

    #[tokio::test]
    async fn requirement_lock_targets_the_broadcast_row() {
        let db = migrated_db().await;
        let broadcast = order(None, PurchaseOrderStatus::Requested);
        stored(&broadcast).insert(&db).await.unwrap();
        let mut quote = order(Some(Uuid::new_v4()), PurchaseOrderStatus::Quoted);
        quote.correlation_id = broadcast.correlation_id;
        stored(&quote).insert(&db).await.unwrap();

        let txn = db.begin().await.unwrap();
        let anchor = lock_requirement(&txn, broadcast.correlation_id)
            .await
            .unwrap()
            .map(|row| row.id);
        let bound_only = lock_requirement(&txn, Uuid::new_v4()).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(anchor, Some(broadcast.id));
        assert!(bound_only.is_none());
    }

    #[tokio::test]
    async fn sibling_win_is_detected_excluding_the_row_itself() {
        let db = migrated_db().await;
        let winner = order(Some(Uuid::new_v4()), PurchaseOrderStatus::Delivered);
        stored(&winner).insert(&db).await.unwrap();
        let mut loser = order(Some(Uuid::new_v4()), PurchaseOrderStatus::Rejected);
        loser.correlation_id = winner.correlation_id;
        stored(&loser).insert(&db).await.unwrap();

        assert!(sibling_has_won(&db, winner.correlation_id, Some(loser.id))
            .await
            .unwrap());
        assert!(!sibling_has_won(&db, winner.correlation_id, Some(winner.id))
            .await
            .unwrap());
    }

    #[test]
    fn broadcast_rows_only_accept_quotes_while_requested() {
        let vendor = Actor::vendor(Uuid::new_v4(), 1);
        assert!(check_quotable(&vendor, &order(None, PurchaseOrderStatus::Requested)).is_ok());
        assert_matches!(
            check_quotable(&vendor, &order(None, PurchaseOrderStatus::Rejected)),
            Err(ServiceError::InvalidTransition(_))
        );
    }

    #[test]
    fn own_rows_can_be_requoted_until_won() {
        let vendor = Actor::vendor(Uuid::new_v4(), 1);
        for status in [
            PurchaseOrderStatus::Requested,
            PurchaseOrderStatus::Quoted,
            PurchaseOrderStatus::Rejected,
        ] {
            assert!(check_quotable(&vendor, &order(Some(vendor.id), status)).is_ok());
        }
        assert_matches!(
            check_quotable(&vendor, &order(Some(vendor.id), PurchaseOrderStatus::Approved)),
            Err(ServiceError::InvalidTransition(_))
        );
    }

    #[test]
    fn wrong_role_is_forbidden_before_state_is_considered() {
        let supervisor = Actor::supervisor(Uuid::new_v4(), 1);
        assert_matches!(
            allowed(&supervisor, ProcurementAction::Approve, Some(PurchaseOrderStatus::Quoted)),
            Err(ServiceError::Forbidden(_))
        );
    }

    #[test]
    fn asset_type_names_parse_exactly() {
        assert_eq!(parse_asset_type(" Hardware ").unwrap(), AssetType::Hardware);
        assert_eq!(parse_asset_type("Software").unwrap(), AssetType::Software);
        assert_matches!(
            parse_asset_type("Furniture"),
            Err(ServiceError::InvalidAssetType(msg)) if msg.contains("Furniture")
        );
    }

    #[test]
    fn admins_only_act_within_their_organization() {
        let admin = Actor::admin(Uuid::new_v4(), 2);
        assert_matches!(
            ensure_same_org(&admin, &order(None, PurchaseOrderStatus::Quoted)),
            Err(ServiceError::Forbidden(_))
        );
    }
}
