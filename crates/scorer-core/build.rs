/// Builds the gRPC client and server code for the `scorer.proto` definition
/// using `tonic-prost-build`.
///
/// The protobuf definitions in `proto/` are compiled into Rust modules with
/// gRPC bindings in the crate's `OUT_DIR`, alongside an encoded file
/// descriptor set that the server registers with gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/scorer.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/scorer_descriptor.bin`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code is accessible in Rust via:
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("scorer");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("scorer_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/scorer.proto"], &["proto"])
        .unwrap();
}
