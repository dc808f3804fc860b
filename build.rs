use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let proto_dir = PathBuf::from("proto");

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/");

    // Compile the proto files from the local proto/ directory
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path(out_dir.join("botgate_descriptor.bin"))
        .compile_protos(
            &[
                proto_dir.join("envoy/service/auth/v3/external_auth.proto"),
                proto_dir.join("envoy/service/ext_proc/v3/external_processor.proto"),
            ],
            &[&proto_dir],
        )?;

    // prost-build escapes package segments that are Rust keywords (e.g. "type" -> "r#type")
    // in the generated filename, but tonic::include_proto! looks up the file by the
    // literal package name. Rename to match what the macro expects.
    let escaped = out_dir.join("envoy.r#type.v3.rs");
    let expected = out_dir.join("envoy.type.v3.rs");
    if escaped.exists() {
        std::fs::rename(escaped, expected)?;
    }

    Ok(())
}
