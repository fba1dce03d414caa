use crate::gateway::Ctx;
use gateway_controller_core::{
    source::{ListenerSource, ListenerTlsSource, TlsMode},
    tls::{
        apply_tls_extension_options, resolve_frontend_tls_config, CaCertificateErrors,
        ClientCertificateValidation, ClientCertificateValidationIr, ListenerTlsError,
        TlsConfigIr, TlsErrorReasons,
    },
};
use gateway_controller_k8s_status::{
    conditions::{self, reasons},
    Condition,
};

/// Resolves the TLS settings of a listener that terminates TLS. Listeners
/// that do not terminate TLS resolve to `None`.
///
/// Every error is reported on the listener. A listener whose client
/// certificate validation is only partially valid keeps its configuration,
/// with the invalid parts dropped; any other error drops the listener's
/// configuration and is returned.
pub(crate) fn resolve(
    ctx: &mut Ctx<'_>,
    listener: &ListenerSource,
) -> Result<Option<TlsConfigIr>, ListenerTlsError> {
    let Some(tls) = listener
        .tls
        .as_ref()
        .filter(|tls| tls.mode == TlsMode::Terminate)
    else {
        return Ok(None);
    };

    let (validation, frontend_error) =
        resolve_frontend_tls_config(listener.port, ctx.gateway.frontend_tls.as_ref());
    if let Some(errors) = frontend_error {
        let error = ListenerTlsError::CaCertificate(errors);
        report(ctx, &listener.name, &error, validation.is_some());
        if validation.is_none() {
            return Err(error);
        }
    }

    match build(ctx, listener, tls, validation.as_ref()) {
        Ok((cfg, None)) => Ok(Some(cfg)),
        Ok((cfg, Some(error))) => {
            report(ctx, &listener.name, &error, true);
            Ok(Some(cfg))
        }
        Err(error) => {
            report(ctx, &listener.name, &error, false);
            Err(error)
        }
    }
}

/// Builds the TLS configuration, returning along with it the error of any
/// CA certificate that could not be used.
fn build(
    ctx: &Ctx<'_>,
    listener: &ListenerSource,
    tls: &ListenerTlsSource,
    validation: Option<&ClientCertificateValidationIr>,
) -> Result<(TlsConfigIr, Option<ListenerTlsError>), ListenerTlsError> {
    let gateway = &ctx.gateway.source;
    let mut cfg = TlsConfigIr::default();
    for cert_ref in &tls.certificate_refs {
        cfg.certificates
            .push(ctx.snapshot.tls_certificate(gateway, cert_ref)?);
    }
    apply_tls_extension_options(&tls.options, &mut cfg)?;

    let validation = validation.filter(|v| !v.ca_certificate_refs.is_empty());
    if !cfg.verify_subject_alt_names.is_empty() && validation.is_none() {
        return Err(ListenerTlsError::SubjectAltNamesRequireCa);
    }
    let Some(validation) = validation else {
        return Ok((cfg, None));
    };

    let (bundles, errors) = ctx.snapshot.ca_certificates(gateway, validation);
    if bundles.is_empty() {
        if validation.require_client_certificate {
            return Err(ListenerTlsError::CaCertificate(errors));
        }
        tracing::warn!(
            gateway = %gateway,
            listener = %listener.name,
            error = %errors,
            "No CA certificate could be loaded; client certificates will not be validated"
        );
        return Ok((cfg, None));
    }

    cfg.client_certificate_validation = Some(ClientCertificateValidation {
        ca_certificates: bundles,
        require_client_certificate: validation.require_client_certificate,
    });
    let error = nonempty(errors).map(ListenerTlsError::CaCertificate);
    Ok((cfg, error))
}

fn nonempty(errors: CaCertificateErrors) -> Option<CaCertificateErrors> {
    (!errors.is_empty()).then_some(errors)
}

/// A partially valid listener stays accepted and programmed; its conditions
/// still carry the error.
fn report(ctx: &mut Ctx<'_>, listener: &str, error: &ListenerTlsError, partially_valid: bool) {
    tracing::debug!(
        gateway = %ctx.gateway.source,
        %listener,
        %error,
        partially_valid,
        "Listener TLS configuration is invalid"
    );
    let TlsErrorReasons {
        resolved_refs_reason,
        accepted_reason,
        message,
    } = error.reasons();
    ctx.listener_condition(
        listener,
        Condition::new(
            conditions::RESOLVED_REFS,
            false,
            resolved_refs_reason,
            message.clone(),
        ),
    );
    ctx.listener_condition(
        listener,
        Condition::new(
            conditions::PROGRAMMED,
            partially_valid,
            reasons::INVALID,
            message.clone(),
        ),
    );
    ctx.listener_condition(
        listener,
        Condition::new(conditions::ACCEPTED, partially_valid, accepted_reason, message),
    );
}
