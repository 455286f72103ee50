//! Fixed table of Google services this client knows about: the OAuth
//! scopes each requires, whether it is a consumer-account service or a
//! domain-only one, and the order it should be listed/expanded in.

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Service {
    Gmail,
    Calendar,
    Drive,
    Contacts,
    Tasks,
    Sheets,
    People,
    Docs,
    Keep,
    Groups,
}

struct Descriptor {
    service: Service,
    name: &'static str,
    scopes: &'static [&'static str],
    user_flag: bool,
    order: u8,
}

const REGISTRY: &[Descriptor] = &[
    Descriptor {
        service: Service::Gmail,
        name: "gmail",
        scopes: &["https://mail.google.com/"],
        user_flag: true,
        order: 0,
    },
    Descriptor {
        service: Service::Calendar,
        name: "calendar",
        scopes: &["https://www.googleapis.com/auth/calendar"],
        user_flag: true,
        order: 1,
    },
    Descriptor {
        service: Service::Drive,
        name: "drive",
        scopes: &["https://www.googleapis.com/auth/drive"],
        user_flag: true,
        order: 2,
    },
    Descriptor {
        service: Service::Contacts,
        name: "contacts",
        scopes: &["https://www.googleapis.com/auth/contacts"],
        user_flag: true,
        order: 3,
    },
    Descriptor {
        service: Service::Tasks,
        name: "tasks",
        scopes: &["https://www.googleapis.com/auth/tasks"],
        user_flag: true,
        order: 4,
    },
    Descriptor {
        service: Service::Sheets,
        name: "sheets",
        scopes: &["https://www.googleapis.com/auth/spreadsheets"],
        user_flag: true,
        order: 5,
    },
    Descriptor {
        service: Service::People,
        name: "people",
        scopes: &["https://www.googleapis.com/auth/contacts.readonly"],
        user_flag: true,
        order: 6,
    },
    Descriptor {
        service: Service::Docs,
        name: "docs",
        scopes: &["https://www.googleapis.com/auth/documents"],
        user_flag: true,
        order: 7,
    },
    Descriptor {
        service: Service::Keep,
        name: "keep",
        scopes: &["https://www.googleapis.com/auth/keep"],
        user_flag: true,
        order: 8,
    },
    Descriptor {
        service: Service::Groups,
        name: "groups",
        scopes: &["https://www.googleapis.com/auth/admin.directory.group"],
        user_flag: false,
        order: 9,
    },
];

fn descriptor(service: Service) -> &'static Descriptor {
    REGISTRY
        .iter()
        .find(|d| d.service == service)
        .expect("every Service variant has a registry entry")
}

impl Service {
    pub fn name(self) -> &'static str {
        descriptor(self).name
    }

    pub fn scopes(self) -> &'static [&'static str] {
        descriptor(self).scopes
    }

    pub fn is_user_service(self) -> bool {
        descriptor(self).user_flag
    }

    pub fn order(self) -> u8 {
        descriptor(self).order
    }

    /// All known services, in display order.
    pub fn all() -> Vec<Service> {
        let mut all: Vec<Service> = REGISTRY.iter().map(|d| d.service).collect();
        all.sort_by_key(|s| descriptor(*s).order);
        all
    }
}

/// Parse a service name, case-insensitively and trimmed.
///
/// On failure, the error message lists every recognised name so the CLI
/// can surface it directly.
pub fn parse_service(input: &str) -> Result<Service, Error> {
    let trimmed = input.trim().to_lowercase();
    REGISTRY
        .iter()
        .find(|d| d.name == trimmed)
        .map(|d| d.service)
        .ok_or_else(|| {
            let allowed: Vec<&str> = REGISTRY.iter().map(|d| d.name).collect();
            Error::Config(format!(
                "unknown service `{input}`; allowed values: {}",
                allowed.join(", ")
            ))
        })
}

/// Union the scopes required by `services`, de-duplicated and sorted so
/// the resulting authorization URL is stable and diff-friendly across
/// invocations.
pub fn scopes_for_services(services: &[Service]) -> Vec<String> {
    let mut scopes: Vec<String> = services
        .iter()
        .flat_map(|s| s.scopes().iter().map(|s| s.to_string()))
        .collect();
    scopes.sort();
    scopes.dedup();
    scopes
}
