fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=proto/faas.proto");

    // Prefer a vendored protoc to avoid requiring a system installation.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .map_err(|e| format!("failed to locate vendored protoc: {e}"))?;
    std::env::set_var("PROTOC", protoc_path);

    // The server half is only used by the in-process runtime mocks in tests,
    // but generating it here keeps a single codegen path.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/faas.proto"], &["proto/"])?;
    Ok(())
}
