use crate::peer::types::IceServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 4]>())
}

/// `client_<unix-millis>_<hex>`, сервер использует его как имя сокета
pub fn client_id() -> String {
    format!(
        "client_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        random_id()
    )
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(url: &str, config: &IceServerConfig) -> String {
    // Если url уже начинается с "turn:", "turns:" или "stun:", возвращаем как есть
    if url.starts_with("turn:") || url.starts_with("turns:") || url.starts_with("stun:") {
        url.to_string()
    } else {
        // сервер с учётными данными считаем TURN
        let scheme = if config.username.is_some() && config.credential.is_some() {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(username: Option<&str>) -> IceServerConfig {
        IceServerConfig {
            urls: vec![],
            username: username.map(Into::into),
            credential: username.map(|_| "secret".to_string()),
        }
    }

    #[test]
    fn scheme_is_kept_when_present() {
        assert_eq!(
            add_ice_url_scheme("turns:relay.example.org:5349", &server(None)),
            "turns:relay.example.org:5349"
        );
    }

    #[test]
    fn scheme_depends_on_credentials() {
        assert_eq!(
            add_ice_url_scheme("stun.example.org:3478", &server(None)),
            "stun:stun.example.org:3478"
        );
        assert_eq!(
            add_ice_url_scheme("relay.example.org:3478", &server(Some("user"))),
            "turn:relay.example.org:3478"
        );
    }

    #[test]
    fn client_ids_are_unique() {
        let a = client_id();
        let b = client_id();
        assert!(a.starts_with("client_"));
        assert_ne!(a, b);
    }
}
