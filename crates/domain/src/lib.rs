//! Event-sourced Redfish resource model.
//!
//! Every resource is an aggregate folded from its event log. HTTP verbs
//! become commands through an ordered search path; commands are handled
//! under the aggregate's lock, their events appended with a version check
//! and published; the caller waits for the `HTTPCmdProcessed`
//! notification carrying its response. Properties may be computed by
//! plugins named in `@meta` descriptors.
//!
//! # Example
//!
//! ```ignore
//! use redfishd_domain::{CreateRedfishResource, HttpVerb, ResourceRequest, ServiceBuilder};
//!
//! let service = ServiceBuilder::new(config).build().await?;
//! service
//!     .execute(&CreateRedfishResource::new("/redfish/v1", "#ServiceRoot.v1_0_0.ServiceRoot", ""))
//!     .await?;
//! let response = service.dispatch(ResourceRequest::new(HttpVerb::Get, "/redfish/v1")).await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod aggregate;
pub mod command;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod messages;
pub mod meta;
pub mod plugin;
pub mod privileges;
pub mod property;
pub mod registry;
pub mod repository;
pub mod saga;
pub mod service;
pub mod tree;

pub use aggregate::{RedfishResourceAggregate, ResourceState};
pub use command::{
    AggIdSetter, CmdIdSetter, Command, CommandContext, CommandOutcome, HttpRequestParser,
    UserDetailsSetter,
};
pub use commands::{
    AddCollectionMember, CreateRedfishResource, DeleteRedfishResource, GetRedfishResource,
    OptionsRedfishResource, PatchRedfishResource, RemoveCollectionMember, RemoveRedfishResource,
    RemoveRedfishResourceProperty, UpdateRedfishResourcePrivileges,
    UpdateRedfishResourceProperties,
};
pub use dispatcher::{RequestDispatcher, ResourceRequest, ResourceResponse};
pub use error::{DomainError, Result};
pub use events::{HttpCmdProcessed, ResourceEvent};
pub use handler::CommandBus;
pub use meta::{MetaResolver, PatchOutcome, PropertyFailure};
pub use plugin::{Plugin, PluginError, PluginRegistry, PropertyController};
pub use privileges::{AuthAction, HttpVerb, Principal, PrivilegeMap};
pub use property::{MetaBinding, MetaDescriptor, Property, PropertyMap, PropertyValue};
pub use registry::{CommandRegistry, search_path};
pub use repository::{AggregateRepository, SharedStore};
pub use saga::CollectionSaga;
pub use service::{RedfishService, ServiceBuilder};
pub use tree::ResourceTree;
