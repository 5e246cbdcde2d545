//! Concrete commands.

pub mod http;
pub mod resource;

pub use http::{
    DEFAULT_PREFIX, DeleteRedfishResource, GetRedfishResource, HttpCommandState,
    OptionsRedfishResource, PatchRedfishResource, default_key,
};
pub use resource::{
    AddCollectionMember, CreateRedfishResource, RemoveCollectionMember, RemoveRedfishResource,
    RemoveRedfishResourceProperty, UpdateRedfishResourcePrivileges,
    UpdateRedfishResourceProperties,
};
