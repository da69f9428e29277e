fn main() {
    let target = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target == "windows" {
        vcpkg::Config::new()
            .find_package("gdal")
            .expect("GDAL not found through vcpkg");
    }
}
