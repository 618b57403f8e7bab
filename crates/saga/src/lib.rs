//! The order saga of the storefront.
//!
//! An order moves through the services like this:
//! 1. Cart checkout validates the cart and publishes `order.requested`
//! 2. The order service creates the order; the payment service records its replica
//! 3. Payment reserves stock, charges the gateway and publishes `payment.completed`
//! 4. Orders complete, carts drop the purchased items, buyers are notified
//!
//! Cancelling an order (by its owner or by the expiry sweep) publishes
//! `order.cancelled`, on which the product service gives back the reserved
//! stock. Nothing is shared between services except the bus.

pub mod cart;
pub mod catalog;
pub mod error;
pub mod gateway;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod storefront;

pub use cart::{CartService, OrderHandle};
pub use catalog::{ProductCatalog, ReadThroughCatalog};
pub use error::{Result, SagaError};
pub use gateway::{DECLINED_TOKEN, GatewayError, InMemoryPaymentGateway, PaymentGateway};
pub use notifications::{Notification, NotificationKind, NotificationService};
pub use orders::{Actor, OrderService};
pub use payments::PaymentService;
pub use storefront::{Backends, Storefront, StorefrontConfig};
