/// Macro that helps to check test file exist at compile time.
/// [link](https://stackoverflow.com/questions/30003921/how-can-i-locate-resources-for-testing-with-cargo)
#[macro_export]
macro_rules! test_file_path {
    ($arg1:expr) => {{
        let _ = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $arg1));
        let r = concat!(env!("CARGO_MANIFEST_DIR"), $arg1);
        r
    }};
}
