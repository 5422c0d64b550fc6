//! YAML Surgeon (C7): minimal-textual-diff edits to pipeline YAML
//! documents, plus the semantic operations layered on top of it.

pub mod ops;
pub mod surgeon;

pub use ops::{
    Op, PathSegment, YamlPath, add_param, add_run_after, add_task, parse_generic_path, parse_scalar_value,
    remove_param, replace_bundle_refs, set_param,
};
pub use surgeon::YamlSurgeon;
