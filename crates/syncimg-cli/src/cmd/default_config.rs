//! Default-config command

use syncimg_core::config::DEFAULT_CONFIG;

pub fn default_config() {
    print!("{DEFAULT_CONFIG}");
}
