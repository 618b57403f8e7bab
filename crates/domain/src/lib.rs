//! Domain layer of the storefront.
//!
//! This crate provides:
//! - Aggregates: [`Product`], [`Cart`], [`Order`], [`Payment`]
//! - Value objects: [`Money`], [`LineItem`], [`OrderLine`]
//! - Bus messages exchanged by the services, see [`messages`]
//! - [`Repository`], the read-modify-write helper over a version store

pub mod aggregate;
pub mod cart;
pub mod error;
pub mod messages;
pub mod order;
pub mod payment;
pub mod product;
pub mod replica;
pub mod repository;
pub mod value_objects;

pub use aggregate::Aggregate;
pub use cart::{Cart, CartError};
pub use common::{AggregateId, UserId};
pub use error::DomainError;
pub use messages::{OrderCancelled, OrderRequested, PaymentCompleted, ProductUpdated};
pub use order::{CancelReason, Order, OrderError, OrderStatus};
pub use payment::Payment;
pub use product::{Product, ProductError};
pub use replica::{OrderReplica, ProductSnapshot};
pub use repository::{CommandResult, Repository};
pub use value_objects::{LineItem, Money, OrderLine};
