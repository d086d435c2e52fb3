//! Read-only collaborators owned by the surrounding asset-tracking application.
//!
//! Lookups run before a procurement transaction opens, so they use their own
//! pooled connection and never hold one while a transaction waits.

use crate::{
    errors::ServiceError,
    models::{category, location, room, user, vendor_registration},
};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter};
use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};
use tracing::error;
use uuid::Uuid;

#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn category_exists(&self, id: i32) -> Result<bool, ServiceError>;
    async fn location_exists(&self, id: i32) -> Result<bool, ServiceError>;
    async fn room_exists(&self, id: i32) -> Result<bool, ServiceError>;
    async fn user_exists(&self, id: Uuid) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait RegistrationRegistry: Send + Sync {
    async fn is_registered(&self, vendor_id: Uuid, org_id: i32) -> Result<bool, ServiceError>;
    async fn organizations_for(&self, vendor_id: Uuid) -> Result<Vec<i32>, ServiceError>;
}

fn unavailable(what: &str, err: DbErr) -> ServiceError {
    error!(lookup = what, error = %err, "Reference lookup failed");
    ServiceError::DependencyUnavailable(format!("{} lookup failed", what))
}

/// Reference tables read straight from the application database.
#[derive(Clone)]
pub struct DbReferenceData {
    db: Arc<DatabaseConnection>,
}

impl DbReferenceData {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReferenceData for DbReferenceData {
    async fn category_exists(&self, id: i32) -> Result<bool, ServiceError> {
        category::Entity::find_by_id(id)
            .count(&*self.db)
            .await
            .map(|n| n > 0)
            .map_err(|e| unavailable("category", e))
    }

    async fn location_exists(&self, id: i32) -> Result<bool, ServiceError> {
        location::Entity::find_by_id(id)
            .count(&*self.db)
            .await
            .map(|n| n > 0)
            .map_err(|e| unavailable("location", e))
    }

    async fn room_exists(&self, id: i32) -> Result<bool, ServiceError> {
        room::Entity::find_by_id(id)
            .count(&*self.db)
            .await
            .map(|n| n > 0)
            .map_err(|e| unavailable("room", e))
    }

    async fn user_exists(&self, id: Uuid) -> Result<bool, ServiceError> {
        user::Entity::find_by_id(id)
            .count(&*self.db)
            .await
            .map(|n| n > 0)
            .map_err(|e| unavailable("user", e))
    }
}

/// Vendor registrations read from `vendor_registrations`.
#[derive(Clone)]
pub struct DbRegistrationRegistry {
    db: Arc<DatabaseConnection>,
}

impl DbRegistrationRegistry {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RegistrationRegistry for DbRegistrationRegistry {
    async fn is_registered(&self, vendor_id: Uuid, org_id: i32) -> Result<bool, ServiceError> {
        vendor_registration::Entity::find_by_id((vendor_id, org_id))
            .count(&*self.db)
            .await
            .map(|n| n > 0)
            .map_err(|e| unavailable("vendor registration", e))
    }

    async fn organizations_for(&self, vendor_id: Uuid) -> Result<Vec<i32>, ServiceError> {
        vendor_registration::Entity::find()
            .filter(vendor_registration::Column::VendorId.eq(vendor_id))
            .all(&*self.db)
            .await
            .map(|rows| rows.into_iter().map(|row| row.org_id).collect())
            .map_err(|e| unavailable("vendor registration", e))
    }
}

/// In-process reference data for tests and local tooling.
#[derive(Debug, Default)]
pub struct InMemoryReferenceData {
    categories: RwLock<HashSet<i32>>,
    locations: RwLock<HashSet<i32>>,
    rooms: RwLock<HashSet<i32>>,
    users: RwLock<HashSet<Uuid>>,
    offline: RwLock<bool>,
}

impl InMemoryReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(self, id: i32) -> Self {
        write(&self.categories).insert(id);
        self
    }

    pub fn with_location(self, id: i32) -> Self {
        write(&self.locations).insert(id);
        self
    }

    pub fn with_room(self, id: i32) -> Self {
        write(&self.rooms).insert(id);
        self
    }

    pub fn add_user(&self, id: Uuid) {
        write(&self.users).insert(id);
    }

    /// Makes every lookup fail with `DependencyUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        *write(&self.offline) = offline;
    }

    fn check_online(&self) -> Result<(), ServiceError> {
        check_online(&self.offline, "reference data")
    }
}

fn check_online(offline: &RwLock<bool>, what: &str) -> Result<(), ServiceError> {
    if *read(offline) {
        Err(ServiceError::DependencyUnavailable(format!("{} offline", what)))
    } else {
        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ReferenceData for InMemoryReferenceData {
    async fn category_exists(&self, id: i32) -> Result<bool, ServiceError> {
        self.check_online()?;
        Ok(read(&self.categories).contains(&id))
    }

    async fn location_exists(&self, id: i32) -> Result<bool, ServiceError> {
        self.check_online()?;
        Ok(read(&self.locations).contains(&id))
    }

    async fn room_exists(&self, id: i32) -> Result<bool, ServiceError> {
        self.check_online()?;
        Ok(read(&self.rooms).contains(&id))
    }

    async fn user_exists(&self, id: Uuid) -> Result<bool, ServiceError> {
        self.check_online()?;
        Ok(read(&self.users).contains(&id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRegistrationRegistry {
    registrations: RwLock<HashSet<(Uuid, i32)>>,
    offline: RwLock<bool>,
}

impl InMemoryRegistrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, vendor_id: Uuid, org_id: i32) {
        write(&self.registrations).insert((vendor_id, org_id));
    }

    /// Makes every lookup fail with `DependencyUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        *write(&self.offline) = offline;
    }
}

#[async_trait]
impl RegistrationRegistry for InMemoryRegistrationRegistry {
    async fn is_registered(&self, vendor_id: Uuid, org_id: i32) -> Result<bool, ServiceError> {
        check_online(&self.offline, "registration registry")?;
        Ok(read(&self.registrations).contains(&(vendor_id, org_id)))
    }

    async fn organizations_for(&self, vendor_id: Uuid) -> Result<Vec<i32>, ServiceError> {
        check_online(&self.offline, "registration registry")?;
        let mut orgs: Vec<i32> = read(&self.registrations)
            .iter()
            .filter(|(vendor, _)| *vendor == vendor_id)
            .map(|(_, org)| *org)
            .collect();
        orgs.sort_unstable();
        Ok(orgs)
    }
}
