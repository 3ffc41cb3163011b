//! Mock ISP/IP profiles the call widget can be pointed at.
//!
//! The catalog is static; the session only ever reads the selected profile.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkType {
    Broadband,
    #[serde(rename = "Mobile 5G")]
    Mobile5G,
    #[serde(rename = "Mobile 4G")]
    Mobile4G,
    Fiber,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Broadband => "Broadband",
            LinkType::Mobile5G => "Mobile 5G",
            LinkType::Mobile4G => "Mobile 4G",
            LinkType::Fiber => "Fiber",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkProfile {
    pub id: String,
    pub ip: String,
    pub provider: String,
    pub location: String,
    pub link_type: LinkType,
    pub latency_ms: u32,
    pub lat: f64,
    pub lng: f64,
}

impl NetworkProfile {
    pub fn new(provider: &str, location: &str, ip: &str) -> Self {
        Self {
            id: String::new(),
            ip: ip.to_string(),
            provider: provider.to_string(),
            location: location.to_string(),
            link_type: LinkType::Broadband,
            latency_ms: 0,
            lat: 0.0,
            lng: 0.0,
        }
    }

    /// Opening instructions for the support agent persona.
    pub fn system_instruction(&self) -> String {
        format!(
            "You are a helpful Technical Support Representative for {}. \
             The user is testing their connection from {} with IP {}. \
             If they ask about the connection, confirm their IP and location. \
             Simulate a professional ISP support agent. \
             Keep responses concise and helpful for a network test.",
            self.provider, self.location, self.ip
        )
    }
}

// (id, ip, provider, location, type, latency, lat, lng)
const CATALOG: &[(&str, &str, &str, &str, LinkType, u32, f64, f64)] = &[
    ("1", "122.160.22.15", "Airtel India", "Delhi, India", LinkType::Fiber, 24, 28.6139, 77.2090),
    ("2", "122.170.11.45", "Airtel India", "Mumbai, India", LinkType::Mobile5G, 45, 19.0760, 72.8777),
    ("3", "49.32.112.55", "Reliance Jio Infocomm", "Bangalore, India", LinkType::Mobile5G, 32, 12.9716, 77.5946),
    ("4", "49.35.201.12", "Reliance Jio Infocomm", "Hyderabad, India", LinkType::Fiber, 18, 17.3850, 78.4867),
    ("5", "192.168.0.101", "TP-Link Test Network", "Local Test Lab (Simulated)", LinkType::Broadband, 5, 28.7041, 77.1025),
    ("6", "103.20.12.8", "ACT Fibernet", "Chennai, India", LinkType::Fiber, 15, 13.0827, 80.2707),
    ("7", "14.139.22.88", "Vodafone Idea", "Pune, India", LinkType::Mobile4G, 68, 18.5204, 73.8567),
    ("8", "117.201.10.45", "BSNL Broadband", "Kolkata, India", LinkType::Broadband, 85, 22.5726, 88.3639),
    ("9", "115.99.20.12", "Hathway Cable & Datacom", "Mumbai, India", LinkType::Broadband, 35, 19.0760, 72.8777),
    ("10", "202.191.10.5", "Excitel Broadband", "Noida, India", LinkType::Broadband, 28, 28.5355, 77.3910),
    ("11", "182.72.110.4", "Spectra", "Gurgaon, India", LinkType::Broadband, 12, 28.4595, 77.0266),
    ("12", "103.195.10.99", "GTPL Broadband", "Ahmedabad, India", LinkType::Broadband, 55, 23.0225, 72.5714),
];

/// All built-in profiles, in catalog order.
pub fn catalog() -> Vec<NetworkProfile> {
    CATALOG
        .iter()
        .map(|&(id, ip, provider, location, link_type, latency_ms, lat, lng)| NetworkProfile {
            id: id.to_string(),
            ip: ip.to_string(),
            provider: provider.to_string(),
            location: location.to_string(),
            link_type,
            latency_ms,
            lat,
            lng,
        })
        .collect()
}

/// Finds a profile by catalog id or by IP address.
pub fn find(key: &str) -> Option<NetworkProfile> {
    catalog().into_iter().find(|p| p.id == key || p.ip == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_unique_ids() {
        let profiles = catalog();
        assert_eq!(profiles.len(), 12);
        let mut ids: Vec<_> = profiles.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn find_by_id_or_ip() {
        let delhi = find("1").unwrap();
        assert_eq!(delhi.provider, "Airtel India");
        assert_eq!(delhi.location, "Delhi, India");
        assert_eq!(find("49.35.201.12").unwrap().id, "4");
        assert!(find("missing").is_none());
    }

    #[test]
    fn instruction_embeds_profile() {
        let text = find("1").unwrap().system_instruction();
        assert!(text.contains("Technical Support Representative for Airtel India"));
        assert!(text.contains("from Delhi, India with IP 122.160.22.15"));
    }
}
