/*!
Construction de documents de statut NGINX Plus

Facilite l'écriture de fixtures pour:
- les deux formats de `upstreams.cache_servers` (wrapper `peers` ou tableau)
- des peers avec compteurs de réponses et health checks
- l'ajout de champs arbitraires (inconnus de l'agent)
*/

use serde_json::{json, Map, Value};
use anyhow::Result;

/// Emplacement de la liste des peers dans le document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `upstreams.cache_servers.peers[]`
    Peers,
    /// `upstreams.cache_servers[]` (ancien format)
    Legacy,
}

/// Document de statut complet
#[derive(Debug, Clone)]
pub struct StatusDocumentBuilder {
    layout: Layout,
    fields: Map<String, Value>,
    peers: Vec<Value>,
}

impl StatusDocumentBuilder {
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("version".into(), json!(8));
        fields.insert("nginx_version".into(), json!("1.25.3"));
        fields.insert("address".into(), json!("127.0.0.1"));

        Self { layout: Layout::Peers, fields, peers: Vec::new() }
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn connections(self, accepted: u64, active: u64, dropped: u64, idle: u64) -> Self {
        self.set_field(
            "connections",
            json!({ "accepted": accepted, "active": active, "dropped": dropped, "idle": idle }),
        )
    }

    pub fn requests(self, total: u64, current: u64) -> Self {
        self.set_field("requests", json!({ "total": total, "current": current }))
    }

    pub fn peer(mut self, peer: PeerBuilder) -> Self {
        self.peers.push(peer.build());
        self
    }

    /// Définit un champ de premier niveau (écrase la valeur existante)
    pub fn set_field<S: Into<String>>(mut self, field: S, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }

    pub fn build(&self) -> Value {
        let peers = Value::Array(self.peers.clone());
        let cache_servers = match self.layout {
            Layout::Peers => json!({ "peers": peers }),
            Layout::Legacy => peers,
        };

        let mut doc = self.fields.clone();
        doc.insert("upstreams".into(), json!({ "cache_servers": cache_servers }));
        Value::Object(doc)
    }

    /// Convertit en bytes JSON (corps HTTP)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.build())?)
    }
}

impl Default for StatusDocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entrée d'un peer upstream
#[derive(Debug, Clone, Default)]
pub struct PeerBuilder {
    fields: Map<String, Value>,
}

impl PeerBuilder {
    pub fn new<S: Into<String>>(server: S) -> Self {
        let mut fields = Map::new();
        fields.insert("server".into(), Value::String(server.into()));
        fields.insert("state".into(), json!("up"));
        Self { fields }
    }

    /// Définit un compteur numérique (`active`, `requests`, `sent`, ...)
    pub fn set_number<S: Into<String>>(mut self, field: S, value: u64) -> Self {
        self.fields.insert(field.into(), json!(value));
        self
    }

    pub fn traffic(self, sent: u64, received: u64) -> Self {
        self.set_number("sent", sent).set_number("received", received)
    }

    /// Compteurs par classe de réponse; `total` est la somme
    pub fn responses(mut self, counts: [u64; 5]) -> Self {
        let total: u64 = counts.iter().sum();
        self.fields.insert(
            "responses".into(),
            json!({
                "1xx": counts[0], "2xx": counts[1], "3xx": counts[2],
                "4xx": counts[3], "5xx": counts[4], "total": total
            }),
        );
        self
    }

    pub fn health_checks(mut self, fails: u64, unhealthy: u64) -> Self {
        self.fields.insert(
            "health_checks".into(),
            json!({ "checks": fails + unhealthy, "fails": fails, "unhealthy": unhealthy, "last_passed": fails == 0 }),
        );
        self
    }

    pub fn build(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Document de référence: un peer, valeurs connues
pub fn scenario_document() -> Value {
    json!({
        "connections": { "accepted": 5, "active": 2, "dropped": 0, "idle": 1 },
        "requests": { "total": 100, "current": 3 },
        "upstreams": { "cache_servers": { "peers": [ {
            "active": 1, "requests": 10, "fails": 0, "unavail": 0, "sent": 500, "received": 900,
            "responses": { "1xx": 0, "2xx": 9, "3xx": 1, "4xx": 0, "5xx": 0, "total": 10 },
            "health_checks": { "fails": 0, "unhealthy": 0 }
        } ] } }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_layout() {
        let doc = StatusDocumentBuilder::new()
            .connections(5, 2, 0, 1)
            .peer(PeerBuilder::new("10.0.0.1:80").set_number("requests", 10).responses([0, 9, 1, 0, 0]))
            .build();

        assert_eq!(doc["connections"]["active"], 2);
        let peer = &doc["upstreams"]["cache_servers"]["peers"][0];
        assert_eq!(peer["server"], "10.0.0.1:80");
        assert_eq!(peer["responses"]["2xx"], 9);
        assert_eq!(peer["responses"]["total"], 10);
    }

    #[test]
    fn test_legacy_layout() {
        let doc = StatusDocumentBuilder::new()
            .layout(Layout::Legacy)
            .peer(PeerBuilder::new("a"))
            .peer(PeerBuilder::new("b").traffic(1, 2))
            .build();

        let peers = doc["upstreams"]["cache_servers"].as_array().unwrap();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[1]["received"], 2);
    }

    #[test]
    fn test_extra_fields_and_bytes() {
        let builder = StatusDocumentBuilder::new().set_field("server_zones", json!({ "zone": {} }));
        let bytes = builder.to_bytes().unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(parsed["server_zones"].is_object());
        assert!(parsed["upstreams"]["cache_servers"]["peers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_scenario_document_shape() {
        let doc = scenario_document();
        assert_eq!(doc["requests"]["total"], 100);
        assert_eq!(doc["upstreams"]["cache_servers"]["peers"][0]["received"], 900);
    }
}
