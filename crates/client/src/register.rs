//! Identity provisioning: REGISTER and UNREGISTER.

use protocol::{Frame, KeyPair, MsgId, RembusError, Result, PROTOCOL_VERSION};

use crate::component::Component;
use crate::pending::Settler;

impl Component {
    /// Provisions `cid` on the broker.
    ///
    /// `pin` must be exactly 8 hex characters; it is checked before any I/O.
    /// A fresh RSA key pair is generated, the public key travels in the
    /// REGISTER frame and the private key is saved in the key store once the
    /// broker accepts. A broker that already knows `cid` rejects with a
    /// protocol error.
    pub async fn register(&self, cid: &str, pin: &str, tenant: Option<&str>) -> Result<()> {
        let id = MsgId::with_pin(pin)?;

        let keypair = tokio::task::spawn_blocking(KeyPair::generate)
            .await
            .map_err(|e| RembusError::Crypto(format!("key generation task failed: {}", e)))??;

        let frame = Frame::Register {
            id,
            cid: cid.to_string(),
            tenant: tenant.map(str::to_string),
            public_key: keypair.public_key_pem()?,
            version: PROTOCOL_VERSION,
        };
        self.shared.request(frame, Settler::Default).await?;

        self.shared.keystore.save(cid, &keypair.private_key_pem()?)?;
        tracing::info!(%cid, tenant = ?tenant, "component registered");
        Ok(())
    }

    /// Removes this component's identity from the broker and deletes its
    /// private key.
    pub async fn unregister(&self) -> Result<()> {
        let cid = self
            .cid()
            .ok_or_else(|| {
                RembusError::Validation("unregister requires a component identity".to_string())
            })?
            .to_string();

        let frame = Frame::Unregister {
            id: MsgId::new(),
            cid: cid.clone(),
        };
        self.shared.request(frame, Settler::Default).await?;

        self.shared.keystore.delete(&cid)?;
        tracing::info!(%cid, "component unregistered");
        Ok(())
    }
}
