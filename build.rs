fn main() {
    // Expose git and build metadata to `built_info`.
    if let Err(err) = built::write_built_file() {
        panic!("Failed to acquire build-time information: {err}");
    }
}
