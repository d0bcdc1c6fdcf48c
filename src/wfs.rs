//! Routing backend served as WFS `GetFeature` layers returning GeoJSON.
//!
//! Each query kind is a parameterised SQL view on the server; arguments
//! travel in `viewparams` as `key:value` pairs separated by `;`, with commas
//! inside a value escaped as `\,`.

use std::time::Duration;

use geojson::GeoJson;
use serde::Deserialize;
use tracing::debug;

use crate::cost::{CostAttribute, TransportMode};
use crate::error::{AnalysisError, ConfigError, RoutingError};
use crate::model::{
    CostFeature, CostFeatureCollection, Crs, FeatureCollection, FeatureExt, PathFeatureCollection,
    Point, VertexFeature, VertexId,
};
use crate::traits::RoutingBackend;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WfsConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub output_format: String,
    /// CRS of query points and returned geometries.
    pub crs: String,
    pub nearest_vertex_type_name: String,
    pub nearest_routable_vertex_type_name: String,
    pub shortest_path_type_name: String,
    pub total_cost_type_name: String,
    pub bicycle_network: String,
    pub private_car_network: String,
}

impl Default for WfsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/geoserver/wfs".to_string(),
            timeout_secs: 30,
            output_format: "application/json".to_string(),
            crs: "EPSG:3857".to_string(),
            nearest_vertex_type_name: "tutorial:dgl_nearest_vertex".to_string(),
            nearest_routable_vertex_type_name: "tutorial:dgl_nearest_car_routable_vertex"
                .to_string(),
            shortest_path_type_name: "tutorial:dgl_shortest_path".to_string(),
            total_cost_type_name: "tutorial:dgl_total_cost".to_string(),
            bicycle_network: "bicycle_network".to_string(),
            private_car_network: "car_network".to_string(),
        }
    }
}

impl WfsConfig {
    pub fn network(&self, mode: TransportMode) -> &str {
        match mode {
            TransportMode::Bicycle => &self.bicycle_network,
            TransportMode::PrivateCar => &self.private_car_network,
        }
    }
}

pub struct WfsBackend {
    config: WfsConfig,
    crs: Crs,
    network: String,
    client: reqwest::blocking::Client,
}

impl WfsBackend {
    pub fn new(config: WfsConfig, mode: TransportMode) -> Result<Self, AnalysisError> {
        let crs = Crs::parse(&config.crs).ok_or_else(|| ConfigError::Invalid {
            field: "backend.crs",
            reason: format!("unrecognised CRS `{}`", config.crs),
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RoutingError::Network {
                url: config.url.clone(),
                message: e.to_string(),
            })?;
        let network = config.network(mode).to_string();

        Ok(Self {
            config,
            crs,
            network,
            client,
        })
    }

    fn get_features(
        &self,
        type_name: &str,
        viewparams: &str,
    ) -> Result<FeatureCollection, RoutingError> {
        let request = self
            .client
            .get(&self.config.url)
            .query(&[
                ("service", "WFS"),
                ("version", "1.0.0"),
                ("request", "GetFeature"),
                ("typeName", type_name),
                ("outputformat", self.config.output_format.as_str()),
                ("viewparams", viewparams),
            ])
            .build()
            .map_err(|e| self.convert_reqwest_error(&e, &self.config.url))?;
        let url = request.url().to_string();
        debug!(%url, "WFS request");

        let body = self
            .client
            .execute(request)
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .map_err(|e| self.convert_reqwest_error(&e, &url))?;

        parse_collection(&body)
    }

    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &str) -> RoutingError {
        if error.is_timeout() {
            return RoutingError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.config.timeout_secs,
            };
        }

        if let Some(status) = error.status() {
            return RoutingError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        RoutingError::Network {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }

    fn point_params(&self, point: &Point) -> String {
        format!("x:{};y:{};network:{}", point.lng(), point.lat(), self.network)
    }

    fn cost_query(
        &self,
        sources: &[VertexId],
        targets: &[VertexId],
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        let params = format!(
            "source:{};target:{};cost:{};network:{}",
            id_list(sources),
            id_list(targets),
            cost.column(),
            self.network
        );
        let collection = self.get_features(&self.config.total_cost_type_name, &params)?;
        collection
            .features
            .into_iter()
            .map(CostFeature::from_feature)
            .collect()
    }
}

/// Parse a GeoJSON body. GeoServer reports failures as XML with status 200,
/// which surfaces here as a service error.
fn parse_collection(body: &str) -> Result<FeatureCollection, RoutingError> {
    if body.trim_start().starts_with('<') {
        return Err(RoutingError::Service {
            message: body.chars().take(200).collect(),
        });
    }
    let parsed = body.parse::<GeoJson>().map_err(|e| RoutingError::Parse {
        message: e.to_string(),
    })?;
    match parsed {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        _ => Err(RoutingError::Parse {
            message: "expected a FeatureCollection".to_string(),
        }),
    }
}

fn first_vertex(collection: FeatureCollection, crs: &Crs) -> Result<Option<VertexFeature>, RoutingError> {
    let Some(feature) = collection.features.into_iter().next() else {
        return Ok(None);
    };
    let id = feature
        .property("id")
        .and_then(|id| id.as_i64())
        .map(VertexId)
        .ok_or_else(|| RoutingError::Parse {
            message: "vertex feature without integer `id`".to_string(),
        })?;
    let point = feature.point(crs).map_err(|e| RoutingError::Parse {
        message: e.to_string(),
    })?;
    Ok(Some(VertexFeature { id, point }))
}

fn id_list(ids: &[VertexId]) -> String {
    ids.iter()
        .map(VertexId::to_string)
        .collect::<Vec<_>>()
        .join("\\,")
}

impl RoutingBackend for WfsBackend {
    fn working_crs(&self) -> &Crs {
        &self.crs
    }

    fn nearest_vertex(&self, point: &Point) -> Result<Option<VertexFeature>, RoutingError> {
        let collection =
            self.get_features(&self.config.nearest_vertex_type_name, &self.point_params(point))?;
        first_vertex(collection, &self.crs)
    }

    fn nearest_routable_vertex(
        &self,
        point: &Point,
        radius: f64,
    ) -> Result<Option<VertexFeature>, RoutingError> {
        let params = format!("{};radius:{radius}", self.point_params(point));
        let collection =
            self.get_features(&self.config.nearest_routable_vertex_type_name, &params)?;
        first_vertex(collection, &self.crs)
    }

    fn shortest_path(
        &self,
        origin: VertexId,
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<PathFeatureCollection, RoutingError> {
        let params = format!(
            "source:{origin};target:{destination};cost:{};network:{}",
            cost.column(),
            self.network
        );
        let collection = self.get_features(&self.config.shortest_path_type_name, &params)?;
        Ok(PathFeatureCollection::from(collection))
    }

    fn total_cost_one_to_one(
        &self,
        origin: VertexId,
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.cost_query(&[origin], &[destination], cost)
    }

    fn total_cost_one_to_many(
        &self,
        origin: VertexId,
        destinations: &[VertexId],
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.cost_query(&[origin], destinations, cost)
    }

    fn total_cost_many_to_one(
        &self,
        origins: &[VertexId],
        destination: VertexId,
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.cost_query(origins, &[destination], cost)
    }

    fn total_cost_many_to_many(
        &self,
        origins: &[VertexId],
        destinations: &[VertexId],
        cost: CostAttribute,
    ) -> Result<CostFeatureCollection, RoutingError> {
        self.cost_query(origins, destinations, cost)
    }
}
