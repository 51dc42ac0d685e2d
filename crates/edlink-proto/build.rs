//! Build script for edlink-proto
//!
//! Generates gRPC/protobuf bindings during `cargo build`.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Prefer a system protoc when PROTOC is set, otherwise use the vendored binary.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    println!("cargo:rerun-if-changed=proto/edlink.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[allow(missing_docs)]")
        .type_attribute(
            ".edlink.v1",
            "#[derive(serde::Serialize, serde::Deserialize)]",
        )
        .compile(&["proto/edlink.proto"], &["proto"])?;

    Ok(())
}
