/*!
# NGINX Plus DevKit - Stubs et Utilitaires pour Développement

Bibliothèque facilitant les tests de l'agent sans infrastructure réelle:
- Daemon statsd simulé (UDP)
- Serveur `/status` simulé (HTTP)
- Construction de documents de statut
- Harness de test de bout en bout
*/

pub mod statsd_stub;
pub mod status_stub;
pub mod status_builder;
pub mod test_utils;

pub use statsd_stub::{MockStatsdServer, StatsdLine};
pub use status_stub::StatusServerStub;
pub use status_builder::{Layout, PeerBuilder, StatusDocumentBuilder};
pub use test_utils::TestHarness;
