//! Shared runtime mesh types for the meshgen compiler
//!
//! This crate holds everything the compiled output is made of, with no
//! knowledge of the authoring graph:
//!
//! # Modules
//!
//! - [`layout`] - Interleaved buffer layouts and the padding-clearing copy
//! - [`packing`] - Component format conversion (f32 → f16/unorm8/dir8, ...)
//! - [`format`] - Mesh reformatting into canonical layouts
//! - [`mesh`] - The runtime mesh artifact
//! - [`skeleton`] - Skeletons, bone poses and usage flags
//! - [`physics`] - Runtime physics bodies and shape flag packing
//! - [`resource`] - 64-bit streamed resource ids

pub mod format;
pub mod layout;
pub mod mesh;
pub mod packing;
pub mod physics;
pub mod resource;
pub mod skeleton;

pub use format::{
    BufferDesc, FormatError, FormatOptions, MeshLayout, mesh_format, optimize_buffers,
};
pub use layout::{
    BufferChannel, BufferFormat, BufferSemantic, BufferSet, MeshBuffer,
    copy_buffer_clearing_padding,
};
pub use mesh::{MeshSurface, RuntimeMesh, SubMesh};
pub use physics::{
    BodyShapes, BoxShape, ConvexShape, PhysicsBody, SphereShape, SphylShape, TaperedCapsuleShape,
    pack_shape_flags,
};
pub use resource::{StreamedResourceId, StreamedResourceKind};
pub use skeleton::{BonePose, BoneUsageFlags, Skeleton, propagate_usage_flags};
