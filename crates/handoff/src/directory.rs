//! Directory collaborator: who owns a container, and who is a driver.

use custody_core::DirectoryConfig;
use std::collections::HashMap;

/// A driver account known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverAccount {
    pub account_id: String,
    pub name: String,
    pub phone: Option<String>,
}

/// Lookups the handoff core needs from the user and bin directories.
pub trait Directory: Send + Sync {
    /// Company owning `container_ref`, or `None` when the container is unknown.
    fn resolve_company_for_container(&self, container_ref: &str) -> Option<String>;

    /// Driver account for `account_id`, or `None` when no such driver exists.
    fn resolve_driver_account(&self, account_id: &str) -> Option<DriverAccount>;
}

/// Directory backed by fixed maps, seeded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    containers: HashMap<String, String>,
    drivers: HashMap<String, DriverAccount>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DirectoryConfig) -> Self {
        let mut directory = Self::new();
        for container in &config.containers {
            directory = directory.with_container(&container.container_ref, &container.company);
        }
        for driver in &config.drivers {
            directory = directory.with_driver(DriverAccount {
                account_id: driver.account_id.clone(),
                name: driver.name.clone(),
                phone: driver.phone.clone(),
            });
        }
        directory
    }

    pub fn with_container(mut self, container_ref: &str, company: &str) -> Self {
        self.containers
            .insert(container_ref.to_string(), company.to_string());
        self
    }

    pub fn with_driver(mut self, driver: DriverAccount) -> Self {
        self.drivers.insert(driver.account_id.clone(), driver);
        self
    }
}

impl Directory for StaticDirectory {
    fn resolve_company_for_container(&self, container_ref: &str) -> Option<String> {
        self.containers.get(container_ref).cloned()
    }

    fn resolve_driver_account(&self, account_id: &str) -> Option<DriverAccount> {
        self.drivers.get(account_id).cloned()
    }
}
