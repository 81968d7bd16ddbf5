/// Shape and type inference functions of the built-in primitives.
pub mod infer;
/// The [Primitive](primitive::Primitive) type, primitive names and attributes.
pub mod primitive;
/// The [PrimitiveRegistry](registry::PrimitiveRegistry) with per-primitive metadata.
pub mod registry;
pub mod result;
