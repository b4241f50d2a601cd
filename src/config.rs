//! Process-wide defaults.
//!
//! Parses environment variables that supply the defaults used by the
//! convenience constructors ([`crate::Gpio::open_line`],
//! [`crate::Mmio::open`]).

use std::path::PathBuf;

/// Default GPIO chip for lines opened without an explicit chip.
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";

/// Default consumer label attached to requested GPIO lines.
pub const DEFAULT_GPIO_CONSUMER: &str = "periphery";

/// Default device physical memory is mapped from.
pub const DEFAULT_MEM_DEVICE: &str = "/dev/mem";

/// Defaults parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// GPIO chip device node.
    pub gpio_chip: PathBuf,

    /// Consumer label shown by the kernel for claimed lines (at most 31
    /// bytes; longer values fall back to the default).
    pub gpio_consumer: String,

    /// Memory device used by MMIO mappings.
    pub mem_device: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gpio_chip: PathBuf::from(DEFAULT_GPIO_CHIP),
            gpio_consumer: DEFAULT_GPIO_CONSUMER.to_string(),
            mem_device: PathBuf::from(DEFAULT_MEM_DEVICE),
        }
    }
}

impl Settings {
    /// Parse configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PERIPHERY_GPIO_CHIP`: GPIO chip path (default: `/dev/gpiochip0`)
    /// - `PERIPHERY_GPIO_CONSUMER`: line consumer label (default: `periphery`)
    /// - `PERIPHERY_MEM_DEVICE`: memory device (default: `/dev/mem`)
    ///
    /// Empty or unusable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let gpio_chip = non_empty_var("PERIPHERY_GPIO_CHIP")
            .map(PathBuf::from)
            .unwrap_or(defaults.gpio_chip);

        let gpio_consumer = non_empty_var("PERIPHERY_GPIO_CONSUMER")
            .filter(|label| label.len() < 32 && !label.contains('\0'))
            .unwrap_or(defaults.gpio_consumer);

        let mem_device = non_empty_var("PERIPHERY_MEM_DEVICE")
            .map(PathBuf::from)
            .unwrap_or(defaults.mem_device);

        Self {
            gpio_chip,
            gpio_consumer,
            mem_device,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("PERIPHERY_GPIO_CHIP");
        std::env::remove_var("PERIPHERY_GPIO_CONSUMER");
        std::env::remove_var("PERIPHERY_MEM_DEVICE");
    }

    #[test]
    #[serial]
    fn test_defaults_when_not_set() {
        clear_env();

        let settings = Settings::from_env();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.gpio_chip, PathBuf::from("/dev/gpiochip0"));
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("PERIPHERY_GPIO_CHIP", "/dev/gpiochip4");
        std::env::set_var("PERIPHERY_GPIO_CONSUMER", "door-sensor");
        std::env::set_var("PERIPHERY_MEM_DEVICE", "/dev/gpiomem");

        let settings = Settings::from_env();
        assert_eq!(settings.gpio_chip, PathBuf::from("/dev/gpiochip4"));
        assert_eq!(settings.gpio_consumer, "door-sensor");
        assert_eq!(settings.mem_device, PathBuf::from("/dev/gpiomem"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_unusable_values_fall_back() {
        clear_env();
        std::env::set_var("PERIPHERY_GPIO_CHIP", "   ");
        std::env::set_var("PERIPHERY_GPIO_CONSUMER", "a-label-that-is-far-too-long-for-the-kernel");

        let settings = Settings::from_env();
        assert_eq!(settings.gpio_chip, PathBuf::from(DEFAULT_GPIO_CHIP));
        assert_eq!(settings.gpio_consumer, DEFAULT_GPIO_CONSUMER);

        clear_env();
    }
}
