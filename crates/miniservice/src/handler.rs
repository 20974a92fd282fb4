//! Attaching RPC handlers to a [`MiniService`](crate::MiniService).
//!
//! Registration functions receive a [`ServerHandle`] and a handler and attach
//! zero or more tonic services built from it. The shape of a registration
//! function (two parameters, no return value, a server handle first and a
//! handler second) is enforced by the `FnOnce(&mut ServerHandle, H)` bound, so
//! a malformed registration does not compile.
//!
//! Services are keyed by their gRPC name. Attaching a name that is already
//! present replaces the earlier service; routes are only built when the server
//! starts listening.

use std::convert::Infallible;

use tonic::body::BoxBody;
use tonic::codegen::http::{Request, Response};
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tower::Service;
use tracing::warn;

type Attach = Box<dyn FnOnce(&mut RoutesBuilder) + Send>;

/// Server-side view handed to registration functions.
#[derive(Default)]
pub struct ServerHandle {
    services: Vec<(&'static str, Attach)>,
}

impl ServerHandle {
    /// Attaches a generated tonic server, e.g. `GreeterServer::new(handler)`.
    pub fn add_service<S>(&mut self, svc: S) -> &mut Self
    where
        S: Service<Request<BoxBody>, Response = Response<BoxBody>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        let attach: Attach = Box::new(move |routes: &mut RoutesBuilder| {
            routes.add_service(svc);
        });
        match self.services.iter_mut().find(|(name, _)| *name == S::NAME) {
            Some(existing) => {
                warn!(service = S::NAME, "replacing previously registered service");
                existing.1 = attach;
            }
            None => self.services.push((S::NAME, attach)),
        }
        self
    }

    /// Names of the attached services, in registration order.
    pub fn services(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.services.iter().map(|(name, _)| *name)
    }

    pub(crate) fn into_routes(self) -> tonic::service::Routes {
        let mut routes = RoutesBuilder::default();
        for (_, attach) in self.services {
            attach(&mut routes);
        }
        routes.routes()
    }
}

/// A value that knows how to attach `H` to a server.
///
/// Every `FnOnce(&mut ServerHandle, H)` is a registrar, so plain closures and
/// functions work; named types can implement it to bundle several services.
pub trait HandlerRegistrar<H> {
    fn register(self, server: &mut ServerHandle, handler: H);
}

impl<F, H> HandlerRegistrar<H> for F
where
    F: FnOnce(&mut ServerHandle, H),
{
    fn register(self, server: &mut ServerHandle, handler: H) {
        self(server, handler)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::future::{Ready, ready};
    use std::task::{Context, Poll};

    use super::*;

    macro_rules! test_service {
        ($ty:ident, $name:literal) => {
            #[derive(Clone)]
            pub(crate) struct $ty;

            impl NamedService for $ty {
                const NAME: &'static str = $name;
            }

            impl Service<Request<BoxBody>> for $ty {
                type Response = Response<BoxBody>;
                type Error = Infallible;
                type Future = Ready<Result<Self::Response, Infallible>>;

                fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
                    Poll::Ready(Ok(()))
                }

                fn call(&mut self, _req: Request<BoxBody>) -> Self::Future {
                    ready(Ok(Response::new(tonic::body::empty_body())))
                }
            }
        };
    }

    test_service!(Greeter, "test.Greeter");
    test_service!(Orders, "test.Orders");

    #[test]
    fn keeps_registration_order() {
        let mut handle = ServerHandle::default();
        handle.add_service(Orders).add_service(Greeter);

        assert_eq!(handle.services().collect::<Vec<_>>(), ["test.Orders", "test.Greeter"]);
    }

    #[test]
    fn same_name_replaces_in_place() {
        let mut handle = ServerHandle::default();
        handle.add_service(Greeter).add_service(Orders).add_service(Greeter);

        assert_eq!(handle.services().collect::<Vec<_>>(), ["test.Greeter", "test.Orders"]);
        let _ = handle.into_routes();
    }

    #[test]
    fn closures_are_registrars() {
        let mut handle = ServerHandle::default();
        let registrar = |server: &mut ServerHandle, svc: Orders| {
            server.add_service(svc);
        };
        HandlerRegistrar::register(registrar, &mut handle, Orders);

        assert_eq!(handle.services().collect::<Vec<_>>(), ["test.Orders"]);
    }
}
