use futures::future::BoxFuture;
use futures::FutureExt;
use semiont_core::state::PlatformResources;
use semiont_core::types::{CommandKind, PlatformType, ServiceType};

use crate::context::HandlerContext;
use crate::registry::{HandlerDescriptor, HandlerRegistry};
use crate::Result;

/// One deployment target. A strategy contributes its handler table to the
/// shared [`HandlerRegistry`] and, optionally, a way to locate an existing
/// resource when nothing has been persisted for it.
pub trait PlatformStrategy: Send + Sync {
    fn platform(&self) -> PlatformType;

    fn handlers(&self) -> Vec<HandlerDescriptor>;

    fn discover<'a>(
        &'a self,
        _ctx: &'a HandlerContext,
    ) -> BoxFuture<'a, Result<Option<PlatformResources>>> {
        async { Ok(None) }.boxed()
    }

    /// Whether a service type without its own handler may use this
    /// platform's `generic` one.
    fn falls_back_to_generic(&self, _service_type: ServiceType) -> bool {
        true
    }

    fn supports(
        &self,
        registry: &HandlerRegistry,
        service_type: ServiceType,
        command: CommandKind,
    ) -> bool {
        match registry.lookup(self.platform(), service_type, command) {
            Some(d) => d.service_type == service_type || self.falls_back_to_generic(service_type),
            None => false,
        }
    }
}
