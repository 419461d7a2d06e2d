/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/

/// Reads one status packet and bails on anything but OK.
macro_rules! status_ok {
    ($proto:expr) => {{
        let st = $proto.get_status().await?;
        if st != $crate::da::xflash::status::OK {
            return Err($crate::error::Error::Protocol { code: st });
        }
    }};
}

/// Reads one status packet and bails unless it is one of the listed values.
macro_rules! status_any {
    ($proto:expr, $($accept:expr),+ $(,)?) => {{
        let st = $proto.get_status().await?;
        if $(st != $accept)&&+ {
            return Err($crate::error::Error::Protocol { code: st });
        }
    }};
}
