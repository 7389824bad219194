use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config XML: {0}")]
    Xml(#[from] quick_xml::DeError),
}

/// Channel server configuration, loaded from XML.
///
/// Every option has a default so a minimal file only overrides what it
/// needs.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ChannelConfig {
    pub listen_address: IpAddr,
    pub port: u16,
    pub worker_thread_count: usize,
    #[serde(rename = "ChannelID")]
    pub channel_id: u8,
    pub world_server_address: String,
    pub world_server_port: u16,
    pub system_message: String,
    pub system_message_color: u32,
    /// Seconds a channel-switch handoff may stay unconfirmed before the
    /// account is forcibly logged out.
    pub channel_connection_time_out: u32,
    /// Minutes a deleted character lingers before the deletion commits.
    pub character_deletion_delay: u32,
    /// Hex prime for the login key exchange.
    pub diffie_hellman_key_pair: String,
    #[serde(rename = "RegistrationCP")]
    pub registration_cp: u32,
    pub registration_ticket_count: u8,
    pub registration_user_level: u8,
    pub registration_account_enabled: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 14666,
            worker_thread_count: 4,
            channel_id: 0,
            world_server_address: "127.0.0.1".into(),
            world_server_port: 18666,
            system_message: String::new(),
            system_message_color: 0x00FFFFFF,
            channel_connection_time_out: 15,
            character_deletion_delay: 24 * 60,
            diffie_hellman_key_pair: String::new(),
            registration_cp: 0,
            registration_ticket_count: 0,
            registration_user_level: 0,
            registration_account_enabled: false,
        }
    }
}

impl ChannelConfig {
    pub fn from_xml(xml: &str) -> Result<Self, ConfigError> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_full_config() {
        let xml = r#"
            <ChannelConfig>
                <ListenAddress>127.0.0.1</ListenAddress>
                <Port>15000</Port>
                <WorkerThreadCount>8</WorkerThreadCount>
                <ChannelID>2</ChannelID>
                <WorldServerAddress>10.0.0.5</WorldServerAddress>
                <WorldServerPort>19000</WorldServerPort>
                <SystemMessage>Welcome back</SystemMessage>
                <SystemMessageColor>16711680</SystemMessageColor>
                <ChannelConnectionTimeOut>30</ChannelConnectionTimeOut>
                <CharacterDeletionDelay>60</CharacterDeletionDelay>
                <RegistrationCP>5000</RegistrationCP>
                <RegistrationTicketCount>1</RegistrationTicketCount>
                <RegistrationUserLevel>0</RegistrationUserLevel>
                <RegistrationAccountEnabled>true</RegistrationAccountEnabled>
            </ChannelConfig>
        "#;

        let config = ChannelConfig::from_xml(xml).unwrap();
        assert_eq!(config.listen_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, 15000);
        assert_eq!(config.worker_thread_count, 8);
        assert_eq!(config.channel_id, 2);
        assert_eq!(config.world_server_address, "10.0.0.5");
        assert_eq!(config.system_message, "Welcome back");
        assert_eq!(config.channel_connection_time_out, 30);
        assert!(config.registration_account_enabled);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let xml = "<ChannelConfig><Port>20000</Port></ChannelConfig>";
        let config = ChannelConfig::from_xml(xml).unwrap();

        assert_eq!(config.port, 20000);
        assert_eq!(config, ChannelConfig {
            port: 20000,
            ..Default::default()
        });
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(ChannelConfig::from_xml("<ChannelConfig><Port>x</Port>").is_err());
    }
}
