/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::{debug, info};

use crate::da::xml::cmds::{SecurityGetDevFwInfo, SecuritySetFlashPolicy};
use crate::da::xml::xml_lib::{Phase, XmlDa};
use crate::error::{Error, Result, SecurityError};
use crate::utilities::xml::get_tag;

/// Which device identifier is prepended to the random challenge. Chosen by
/// the host to match the vendor's signing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlaIdSelect {
    #[default]
    None,
    Hrid,
    Socid,
}

/// Signs the DA-SLA challenge. There is no universal default; when SLA is
/// enabled on the device a signer must be injected by the host.
pub trait DaSlaSigner: Send + Sync {
    fn id_select(&self) -> SlaIdSelect {
        SlaIdSelect::None
    }

    fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// DA-level SLA: queries `DA.SLA`, and when enabled builds the challenge
/// from the device firmware info and pushes the signature back as the flash
/// policy.
pub(super) async fn da_sla_verify(xml: &mut XmlDa) -> Result<()> {
    let property = xml.get_sys_property("DA.SLA").await.unwrap_or_default();
    if !property.contains("Enabled") {
        debug!("DA SLA disabled ({})", property);
        return Ok(());
    }

    info!("DA SLA is enabled, fetching device firmware info");
    let signer = xml.sla_signer.clone().ok_or(Error::Security(SecurityError::SlaRequired))?;

    let mut raw = Vec::new();
    xml.run_cmd(&SecurityGetDevFwInfo, Phase::Upload(&mut raw)).await?;
    let doc = String::from_utf8_lossy(&raw).into_owned();

    let rnd = decode_hex_tag(&doc, "rnd")?;
    let selected = match signer.id_select() {
        SlaIdSelect::None => Vec::new(),
        SlaIdSelect::Hrid => decode_hex_tag(&doc, "hrid")?,
        SlaIdSelect::Socid => decode_hex_tag(&doc, "socid")?,
    };

    let mut challenge = selected;
    challenge.extend_from_slice(&rnd);
    debug!("DA SLA challenge: {}", hex::encode(&challenge));

    let signature = signer.sign(&challenge)?;
    let cmd = SecuritySetFlashPolicy { length: signature.len() };
    xml.run_cmd(&cmd, Phase::Download(&signature)).await?;

    info!("DA SLA verification passed");
    Ok(())
}

fn decode_hex_tag(doc: &str, tag: &str) -> Result<Vec<u8>> {
    let text = get_tag(doc, tag)?;
    hex::decode(text.trim())
        .map_err(|_| Error::Malformed(format!("non-hex <{}> content", tag)))
}
