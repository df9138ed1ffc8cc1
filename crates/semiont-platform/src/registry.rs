//! `(platform, service type, command) → handler` dispatch table.

use std::collections::HashMap;
use std::fmt;

use futures::future::BoxFuture;
use semiont_core::types::{CommandKind, PlatformType, ServiceType};

use crate::context::{HandlerContext, HandlerOutput};
use crate::Result;

pub type HandlerFn = for<'a> fn(&'a HandlerContext) -> BoxFuture<'a, Result<HandlerOutput>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub platform: PlatformType,
    pub service_type: ServiceType,
    pub command: CommandKind,
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.platform, self.service_type, self.command)
    }
}

#[derive(Clone, Copy)]
pub struct HandlerDescriptor {
    pub command: CommandKind,
    pub platform: PlatformType,
    pub service_type: ServiceType,
    pub handler: HandlerFn,
    /// The handler needs a resource handle; the strategy's `discover` runs
    /// first when no state is persisted.
    pub requires_discovery: bool,
}

impl HandlerDescriptor {
    pub fn new(
        platform: PlatformType,
        service_type: ServiceType,
        command: CommandKind,
        handler: HandlerFn,
    ) -> Self {
        Self {
            command,
            platform,
            service_type,
            handler,
            requires_discovery: false,
        }
    }

    pub fn with_discovery(mut self) -> Self {
        self.requires_discovery = true;
        self
    }

    pub fn key(&self) -> HandlerKey {
        HandlerKey {
            platform: self.platform,
            service_type: self.service_type,
            command: self.command,
        }
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("key", &self.key().to_string())
            .field("requires_discovery", &self.requires_discovery)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, HandlerDescriptor>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration for the same key replaces
    /// the earlier one.
    pub fn register(&mut self, descriptor: HandlerDescriptor) {
        let key = descriptor.key();
        if self.handlers.insert(key, descriptor).is_some() {
            tracing::warn!(handler = %key, "replacing previously registered handler");
        }
    }

    pub fn register_all(&mut self, descriptors: impl IntoIterator<Item = HandlerDescriptor>) {
        for d in descriptors {
            self.register(d);
        }
    }

    /// Exact triple first, then the platform's `generic` handler for the
    /// command.
    pub fn lookup(
        &self,
        platform: PlatformType,
        service_type: ServiceType,
        command: CommandKind,
    ) -> Option<&HandlerDescriptor> {
        let exact = HandlerKey {
            platform,
            service_type,
            command,
        };
        self.handlers.get(&exact).or_else(|| {
            self.handlers.get(&HandlerKey {
                service_type: ServiceType::Generic,
                ..exact
            })
        })
    }

    /// Commands available for a (platform, service type), sorted.
    pub fn commands_for(&self, platform: PlatformType, service_type: ServiceType) -> Vec<CommandKind> {
        let mut commands: Vec<CommandKind> = CommandKind::all()
            .iter()
            .copied()
            .filter(|c| self.lookup(platform, service_type, *c).is_some())
            .collect();
        commands.sort();
        commands
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
