use a8cart_proc_macros::{EnumAll, EnumDisplay, EnumFromStr};
use bincode::{Decode, Encode};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CartFamily {
    MegaCart,
    Sic,
    MaxFlash,
    TheCart,
}

/// Every supported bank-switched cartridge subtype.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, EnumDisplay, EnumFromStr, EnumAll,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(a8cart_proc_macros::CustomValueEnum))]
pub enum CartridgeType {
    Mega16,
    Mega32,
    Mega64,
    Mega128,
    Mega256,
    Mega512,
    Mega1024,
    Mega2048,
    Mega4096,
    Sic128,
    Sic256,
    Sic512,
    SicPlus1024,
    AtMax128,
    AtMaxOld1024,
    AtMaxNew1024,
    JaCart128,
    JaCart256,
    JaCart512,
    JaCart1024,
    DCart,
    TheCart32M,
    TheCart64M,
    TheCart128M,
}

impl CartridgeType {
    /// Image size in kilobytes.
    #[must_use]
    pub fn size_kb(self) -> u32 {
        match self {
            Self::Mega16 => 16,
            Self::Mega32 => 32,
            Self::Mega64 => 64,
            Self::Mega128 | Self::Sic128 | Self::AtMax128 | Self::JaCart128 => 128,
            Self::Mega256 | Self::Sic256 | Self::JaCart256 => 256,
            Self::Mega512 | Self::Sic512 | Self::JaCart512 | Self::DCart => 512,
            Self::Mega1024
            | Self::SicPlus1024
            | Self::AtMaxOld1024
            | Self::AtMaxNew1024
            | Self::JaCart1024 => 1024,
            Self::Mega2048 => 2048,
            Self::Mega4096 => 4096,
            Self::TheCart32M => 32 * 1024,
            Self::TheCart64M => 64 * 1024,
            Self::TheCart128M => 128 * 1024,
        }
    }

    /// Image size in bytes.
    #[must_use]
    pub fn size_bytes(self) -> usize {
        self.size_kb() as usize * 1024
    }

    #[must_use]
    pub fn family(self) -> CartFamily {
        match self {
            Self::Mega16
            | Self::Mega32
            | Self::Mega64
            | Self::Mega128
            | Self::Mega256
            | Self::Mega512
            | Self::Mega1024
            | Self::Mega2048
            | Self::Mega4096 => CartFamily::MegaCart,
            Self::Sic128 | Self::Sic256 | Self::Sic512 | Self::SicPlus1024 => CartFamily::Sic,
            Self::AtMax128
            | Self::AtMaxOld1024
            | Self::AtMaxNew1024
            | Self::JaCart128
            | Self::JaCart256
            | Self::JaCart512
            | Self::JaCart1024
            | Self::DCart => CartFamily::MaxFlash,
            Self::TheCart32M | Self::TheCart64M | Self::TheCart128M => CartFamily::TheCart,
        }
    }

    /// Whether the image is backed by writable flash rather than mask ROM.
    #[must_use]
    pub fn has_flash(self) -> bool {
        !matches!(
            self,
            Self::Mega16
                | Self::Mega32
                | Self::Mega64
                | Self::Mega128
                | Self::Mega256
                | Self::Mega1024
                | Self::Mega2048
        )
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Mega16 => "MegaCart 16 KB",
            Self::Mega32 => "MegaCart 32 KB",
            Self::Mega64 => "MegaCart 64 KB",
            Self::Mega128 => "MegaCart 128 KB",
            Self::Mega256 => "MegaCart 256 KB",
            Self::Mega512 => "MegaCart 512 KB (flash)",
            Self::Mega1024 => "MegaCart 1 MB",
            Self::Mega2048 => "MegaCart 2 MB",
            Self::Mega4096 => "MegaCart 4 MB (flash)",
            Self::Sic128 => "SIC! 128 KB",
            Self::Sic256 => "SIC! 256 KB",
            Self::Sic512 => "SIC! 512 KB",
            Self::SicPlus1024 => "SIC!+ 1 MB",
            Self::AtMax128 => "AtariMax 128 KB flash",
            Self::AtMaxOld1024 => "AtariMax 1 MB flash (old)",
            Self::AtMaxNew1024 => "AtariMax 1 MB flash (new)",
            Self::JaCart128 => "J(Atari)Cart 128 KB",
            Self::JaCart256 => "J(Atari)Cart 256 KB",
            Self::JaCart512 => "J(Atari)Cart 512 KB",
            Self::JaCart1024 => "J(Atari)Cart 1 MB",
            Self::DCart => "DCart 512 KB",
            Self::TheCart32M => "The!Cart 32 MB",
            Self::TheCart64M => "The!Cart 64 MB",
            Self::TheCart128M => "The!Cart 128 MB",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CartridgeConfig {
    pub cartridge_type: CartridgeType,
    pub image_path: PathBuf,
    /// Directory and stem for EEPROM/RTC save files; defaults to the image path.
    #[cfg_attr(feature = "serde", serde(default))]
    pub nvram_path: Option<PathBuf>,
}

impl CartridgeConfig {
    #[must_use]
    pub fn nvram_path(&self) -> &PathBuf {
        self.nvram_path.as_ref().unwrap_or(&self.image_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_log::test;

    #[test]
    fn sizes_are_powers_of_two() {
        for cartridge_type in CartridgeType::ALL {
            assert!(
                cartridge_type.size_kb().is_power_of_two(),
                "{cartridge_type} size {}",
                cartridge_type.size_kb()
            );
        }
    }

    #[test]
    fn mega_rom_types_have_no_flash() {
        assert!(!CartridgeType::Mega256.has_flash());
        assert!(CartridgeType::Mega512.has_flash());
        assert!(CartridgeType::Mega4096.has_flash());
        assert!(CartridgeType::DCart.has_flash());
    }

    #[test]
    fn parse_type_names() {
        assert_eq!(CartridgeType::from_str("sicplus1024"), Ok(CartridgeType::SicPlus1024));
        assert_eq!(CartridgeType::from_str("TheCart64M"), Ok(CartridgeType::TheCart64M));
        assert!(CartridgeType::from_str("mega8192").is_err());
    }

    #[test]
    fn families() {
        assert_eq!(CartridgeType::JaCart256.family(), CartFamily::MaxFlash);
        assert_eq!(CartridgeType::Sic256.family(), CartFamily::Sic);
        assert_eq!(CartridgeType::TheCart128M.family(), CartFamily::TheCart);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_from_toml() {
        let config: CartridgeConfig = toml::from_str(
            r#"
            cartridge_type = "Sic512"
            image_path = "carts/sic.bin"
            "#,
        )
        .unwrap();

        assert_eq!(config.cartridge_type, CartridgeType::Sic512);
        assert_eq!(config.nvram_path(), &PathBuf::from("carts/sic.bin"));
    }
}
