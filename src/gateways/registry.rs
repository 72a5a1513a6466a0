use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::{
    asaas::AsaasAdapter, http_client, mercadopago::MercadoPagoAdapter,
    pushinpay::PushinPayAdapter, GatewayAdapter, GatewayId, PaymentMethod,
};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Resolves adapters by gateway id and by payment method.
///
/// Only gateways with credentials are registered, so an unknown or
/// unconfigured id is rejected here before any network call.
pub struct GatewayRegistry {
    adapters: HashMap<GatewayId, Arc<dyn GatewayAdapter>>,
    routing: HashMap<PaymentMethod, GatewayId>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl GatewayRegistry {
    pub fn new(routing: HashMap<PaymentMethod, GatewayId>) -> Self {
        Self {
            adapters: HashMap::new(),
            routing,
            breakers: Arc::new(CircuitBreakerRegistry::default()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let routing = parse_routing(config)?;
        let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: config.gateways.circuit_breaker_failures,
            timeout: Duration::from_secs(config.gateways.circuit_breaker_timeout_secs),
            success_threshold: 1,
        }));
        let client = http_client(config.gateway_timeout())?;
        let mut registry = Self {
            adapters: HashMap::new(),
            routing,
            breakers: breakers.clone(),
        };

        let mp = &config.gateways.mercadopago;
        if let Some(token) = &mp.access_token {
            registry.register(Arc::new(MercadoPagoAdapter::new(
                client.clone(),
                &mp.base_url,
                token,
                mp.webhook_secret.clone(),
                config.webhooks.signature_tolerance_secs,
                breakers.get(GatewayId::MercadoPago.as_ref()),
            )));
        }

        let pp = &config.gateways.pushinpay;
        if let Some(token) = &pp.api_token {
            registry.register(Arc::new(PushinPayAdapter::new(
                client.clone(),
                &pp.base_url,
                token,
                pp.webhook_token.clone(),
                breakers.get(GatewayId::PushinPay.as_ref()),
            )));
        }

        let asaas = &config.gateways.asaas;
        if let Some(key) = &asaas.api_key {
            registry.register(Arc::new(AsaasAdapter::new(
                client,
                &asaas.base_url,
                key,
                asaas.webhook_token.clone(),
                breakers.get(GatewayId::Asaas.as_ref()),
            )));
        }

        info!(
            gateways = ?registry.configured(),
            "payment gateways configured"
        );
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.id(), adapter);
    }

    pub fn configured(&self) -> Vec<GatewayId> {
        let mut ids: Vec<GatewayId> = self.adapters.keys().copied().collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    /// Configured gateways whose status can be pulled, in a stable order.
    pub fn reconcilable(&self) -> Vec<GatewayId> {
        let mut ids: Vec<GatewayId> = self
            .adapters
            .iter()
            .filter(|(_, adapter)| adapter.has_status_query())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    pub fn get(&self, id: GatewayId) -> Result<Arc<dyn GatewayAdapter>, ServiceError> {
        self.adapters
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::UnsupportedGateway(format!("{} is not configured", id)))
    }

    /// Resolves a gateway from a raw path segment such as `mercado_pago`.
    pub fn resolve(&self, raw: &str) -> Result<Arc<dyn GatewayAdapter>, ServiceError> {
        let id = GatewayId::parse(raw).map_err(|e| ServiceError::UnsupportedGateway(e.0))?;
        self.get(id)
    }

    /// The adapter routed to `method`, provided it can actually take it.
    pub fn for_method(
        &self,
        method: PaymentMethod,
    ) -> Result<Arc<dyn GatewayAdapter>, ServiceError> {
        let id = self.routing.get(&method).copied().ok_or_else(|| {
            ServiceError::UnsupportedGateway(format!("no gateway routed for {}", method))
        })?;
        let adapter = self.get(id)?;
        if !adapter.supports(method) {
            return Err(ServiceError::UnsupportedGateway(format!(
                "{} does not accept {}",
                id, method
            )));
        }
        Ok(adapter)
    }

    pub fn breaker_states(&self) -> HashMap<String, CircuitState> {
        self.breakers.states()
    }
}

fn parse_routing(config: &AppConfig) -> Result<HashMap<PaymentMethod, GatewayId>, ServiceError> {
    let routes = &config.payment_methods;
    [
        (PaymentMethod::Pix, &routes.pix),
        (PaymentMethod::CreditCard, &routes.credit_card),
        (PaymentMethod::Boleto, &routes.boleto),
    ]
    .into_iter()
    .map(|(method, raw)| {
        GatewayId::parse(raw)
            .map(|id| (method, id))
            .map_err(|e| ServiceError::UnsupportedGateway(e.0))
    })
    .collect()
}
