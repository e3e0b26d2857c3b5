use std::env;
use std::path::PathBuf;

const PROTOS: &[(&str, &str)] = &[
    ("lpwan_api_v1_descriptor.bin", "proto/lpwan/api/v1"),
    ("lpwan_as_v1_descriptor.bin", "proto/lpwan/as/v1"),
    ("lpwan_ns_v1_descriptor.bin", "proto/lpwan/ns/v1"),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    env::set_var("PROTOC_INCLUDE", protoc_bin_vendored::include_path()?);

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    for (descriptor, dir) in PROTOS {
        let files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "proto"))
            .collect();

        tonic_build::configure()
            .file_descriptor_set_path(out_dir.join(descriptor))
            .compile_protos(&files, &["proto"])?;

        for file in &files {
            println!("cargo:rerun-if-changed={}", file.display());
        }
    }

    Ok(())
}
