/// Default web management port offered on first run
pub const DEFAULT_WEB_PORT: u16 = 80;

/// Default DNS port offered on first run
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Install-phase API paths
pub const INSTALL_GET_ADDRESSES: &str = "/control/install/get_addresses";
pub const INSTALL_CHECK_CONFIG: &str = "/control/install/check_config";
pub const INSTALL_CONFIGURE: &str = "/control/install/configure";

/// Body returned by a successful configure call
pub const OK_BODY: &str = "OK\n";
