//! gNMI (gRPC Network Management Interface) server backed by a NETCONF device
//!
//! Get, Set and Capabilities requests are validated against a compiled YANG
//! schema and translated into NETCONF `<get-config>` subtree filters and
//! `<edit-config>` fragments. Replies are decoded back into gNMI typed values.
//!
//! # Data flow
//!
//! ```text
//! Get: Path -> schema lookup -> subtree filter -> get-config -> decode -> navigate -> TypedValue
//! Set: Path + TypedValue -> schema lookup -> validated node -> edit fragment -> edit-config
//! ```

pub mod adapter;
pub mod coerce;
pub mod config;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod path;
pub mod schema;
pub mod session;
pub mod value;

// Include the generated protobuf code
pub mod gnmi_ext {
    tonic::include_proto!("gnmi_ext");
}

pub mod gnmi {
    tonic::include_proto!("gnmi");
}

pub use adapter::{Adapter, GNMI_VERSION};
pub use config::GnmiNetconfConfig;
pub use error::AdapterError;
pub use schema::Schema;
pub use session::{Datastore, NetconfOps, SessionError, StdioSession};
