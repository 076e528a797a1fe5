fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        // The client is only used by the end-to-end tests.
        .build_client(true)
        .compile_protos(
            &["proto/gnmi_ext.proto", "proto/gnmi.proto"],
            &["proto/", "/usr/include"],
        )?;
    Ok(())
}
