fn main() {
    vergen::EmitBuilder::builder()
        .build_timestamp()
        .git_branch()
        .git_sha(true)
        .cargo_target_triple()
        .cargo_debug()
        .emit()
        .unwrap();
}
