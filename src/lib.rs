//! SCIM 2.0 resource core: typed resources, the filter language and PATCH
//! path resolution.
//!
//! Everything needed to answer "does this filter hold for this resource" and
//! "which entries does this PATCH path address" lives under [`scim`]. The
//! [`config`] and [`observability`] modules back the `sparrow` command line
//! tool and are only built with the `cli` feature.

#[cfg(feature = "cli")]
pub mod config;
#[cfg(feature = "cli")]
pub mod observability;
pub mod scim;
