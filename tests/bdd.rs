use std::{fmt, sync::Arc, sync::Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use cucumber::{given, then, when, World as _};
use rumbo::{
    config::TimeConfig,
    error::AppError,
    models::{
        assignment::{Assignment, Card, Driver, Vehicle},
        empty_trip::{ConvertedTrip, EmptyTrip, EmptyTripRequest, Page, Pagination, SearchState},
        notification::BusMessage,
        trip::{ActionData, PauseReason, Trip, TripAction, TripDraft, TripState, TripStub},
    },
    services::{
        dispatch::{DispatchService, TripBackend},
        erp::SessionToken,
    },
};

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    last_trip: Option<TripStub>,
    last_search: Option<EmptyTrip>,
    last_error: Option<AppError>,
}

impl AppWorld {
    fn dispatch(&self) -> &DispatchService {
        &self
            .state
            .as_ref()
            .expect("session must be connected first")
            .dispatch
    }

    fn trip_id(&self) -> i64 {
        self.last_trip.as_ref().expect("a trip must exist").id
    }

    async fn run_action(&mut self, action: TripAction, data: ActionData) {
        let id = self.trip_id();
        let result = self
            .dispatch()
            .trip_action(&token(), id, action, &data)
            .await;
        match result {
            Ok(updated) => {
                self.last_trip = Some(updated);
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err),
        }
    }

    async fn start_search(&mut self, minutes: u32) {
        let request = EmptyTripRequest {
            wait_limit_minutes: minutes,
            comments: None,
        };
        let result = self.dispatch().create_empty_trip(&token(), &request).await;
        match result {
            Ok(created) => {
                self.last_search = Some(created);
                self.last_error = None;
            }
            Err(err) => self.last_error = Some(err),
        }
    }
}

struct TestState {
    dispatch: DispatchService,
    mock: Arc<MockErp>,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    fn new() -> Self {
        let mock = Arc::new(MockErp::default());
        let dispatch = DispatchService::new(mock.clone(), TimeConfig::default());
        Self { dispatch, mock }
    }
}

fn token() -> SessionToken {
    SessionToken("bdd-session".into())
}

#[derive(Default)]
struct MockState {
    trips: Vec<Trip>,
    searches: Vec<EmptyTrip>,
}

#[derive(Default)]
struct MockErp {
    state: Mutex<MockState>,
}

#[async_trait]
impl TripBackend for MockErp {
    async fn assignment(&self, _session: &SessionToken) -> Result<Assignment, AppError> {
        Ok(Assignment {
            assignment_id: 1,
            driver: Driver {
                id: 10,
                name: "Rosa Luna".into(),
                email: None,
            },
            vehicle: Vehicle {
                id: 20,
                name: "Van 12".into(),
                license_plate: Some("ABC-123".into()),
                model: None,
            },
            card: Some(Card {
                id: 30,
                name: "Fuel card".into(),
                balance: Some(500.0),
            }),
            validity: None,
        })
    }

    async fn list_trips(
        &self,
        _session: &SessionToken,
        state: Option<TripState>,
    ) -> Result<Vec<Trip>, AppError> {
        let trips = self.state.lock().unwrap().trips.clone();
        Ok(trips
            .into_iter()
            .filter(|t| state.map_or(true, |s| t.state == s))
            .collect())
    }

    async fn get_trip(&self, _session: &SessionToken, id: i64) -> Result<Trip, AppError> {
        self.state
            .lock()
            .unwrap()
            .trips
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn create_trip(
        &self,
        _session: &SessionToken,
        draft: &TripDraft,
    ) -> Result<TripStub, AppError> {
        let mut state = self.state.lock().unwrap();
        let id = state.trips.len() as i64 + 1;
        let trip = Trip {
            id,
            name: format!("TRIP-{id:04}"),
            state: TripState::Draft,
            origin: Some(draft.origin.clone()),
            destination: Some(draft.destination.clone()),
            passenger_count: draft.passenger_count,
            passenger_reference: draft.passenger_reference.clone(),
            payment_method: draft.payment_method.clone(),
            amount_mxn: draft.amount_mxn,
            payment_in_usd: draft.payment_in_usd,
            amount_usd: draft.amount_usd,
            exchange_rate: draft.exchange_rate,
            is_scheduled: draft.is_scheduled,
            scheduled_datetime: draft.scheduled_datetime,
            comments: draft.comments.clone(),
            create_date: Some(Utc::now()),
            start_datetime: None,
            end_datetime: None,
            is_paused: false,
            pause_count: 0,
            vehicle: None,
            card: None,
        };
        let stub = TripStub {
            id: trip.id,
            name: trip.name.clone(),
            state: trip.state,
        };
        state.trips.push(trip);
        Ok(stub)
    }

    async fn trip_action(
        &self,
        _session: &SessionToken,
        id: i64,
        action: TripAction,
        data: &ActionData,
    ) -> Result<TripStub, AppError> {
        let mut state = self.state.lock().unwrap();
        let trip = state
            .trips
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(AppError::NotFound)?;
        trip.state = trip.state.transition(action)?;
        if let Some(notes) = &data.notes {
            trip.comments = Some(notes.clone());
        }
        match action {
            TripAction::Pause => {
                trip.is_paused = true;
                trip.pause_count += 1;
            }
            TripAction::Resume => trip.is_paused = false,
            TripAction::Start => trip.start_datetime = Some(Utc::now()),
            TripAction::Done | TripAction::Cancel => trip.end_datetime = Some(Utc::now()),
        }
        Ok(TripStub {
            id: trip.id,
            name: trip.name.clone(),
            state: trip.state,
        })
    }

    async fn pause_reasons(&self, _session: &SessionToken) -> Result<Vec<PauseReason>, AppError> {
        Ok(vec![PauseReason {
            id: 1,
            name: "Lunch break".into(),
            code: Some("lunch".into()),
            description: None,
        }])
    }

    async fn list_empty_trips(
        &self,
        _session: &SessionToken,
        page: u32,
        limit: u32,
    ) -> Result<Page<EmptyTrip>, AppError> {
        let searches = self.state.lock().unwrap().searches.clone();
        let total = searches.len() as u64;
        Ok(Page {
            data: searches,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: 1,
            },
        })
    }

    async fn create_empty_trip(
        &self,
        _session: &SessionToken,
        request: &EmptyTripRequest,
    ) -> Result<EmptyTrip, AppError> {
        let mut state = self.state.lock().unwrap();
        let id = state.searches.len() as i64 + 1;
        let now = Utc::now();
        let search = EmptyTrip {
            id,
            name: format!("BUSQ-{id:04}"),
            state: SearchState::Searching,
            create_date: Some(now),
            wait_limit_minutes: request.wait_limit_minutes,
            wait_limit_time: Some(now + Duration::minutes(request.wait_limit_minutes.into())),
            comments: request.comments.clone(),
            vehicle: None,
            converted_trip_id: None,
        };
        state.searches.push(search.clone());
        Ok(search)
    }

    async fn convert_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<ConvertedTrip, AppError> {
        {
            let mut state = self.state.lock().unwrap();
            let search = state
                .searches
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(AppError::NotFound)?;
            if search.state != SearchState::Searching {
                return Err(AppError::InvalidState(format!(
                    "search {} is already {}",
                    search.name, search.state
                )));
            }
            search.state = SearchState::Converted;
        }
        let draft = TripDraft {
            origin: "pickup point".into(),
            destination: "as directed".into(),
            passenger_count: 1,
            ..TripDraft::default()
        };
        let stub = self.create_trip(session, &draft).await?;
        let mut state = self.state.lock().unwrap();
        if let Some(search) = state.searches.iter_mut().find(|s| s.id == id) {
            search.converted_trip_id = Some(stub.id);
        }
        Ok(ConvertedTrip {
            trip_id: stub.id,
            trip_name: Some(stub.name),
        })
    }

    async fn cancel_empty_trip(
        &self,
        _session: &SessionToken,
        id: i64,
    ) -> Result<EmptyTrip, AppError> {
        let mut state = self.state.lock().unwrap();
        let search = state
            .searches
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(AppError::NotFound)?;
        if search.state != SearchState::Searching {
            return Err(AppError::InvalidState(format!(
                "search {} is already {}",
                search.name, search.state
            )));
        }
        search.state = SearchState::Cancelled;
        Ok(search.clone())
    }

    async fn poll_notifications(
        &self,
        _session: &SessionToken,
        _last: u64,
    ) -> Result<Vec<BusMessage>, AppError> {
        Ok(Vec::new())
    }
}

#[given("a connected driver session")]
async fn given_connected_session(world: &mut AppWorld) {
    world.state = Some(TestState::new());
    world.last_trip = None;
    world.last_search = None;
    world.last_error = None;
}

#[given(regex = r#"^a draft trip from \"([^\"]+)\" to \"([^\"]+)\"$"#)]
async fn given_draft_trip(world: &mut AppWorld, origin: String, destination: String) {
    let draft = TripDraft {
        origin,
        destination,
        passenger_count: 2,
        amount_mxn: 250.0,
        ..TripDraft::default()
    };
    let created = world
        .dispatch()
        .create_trip(&token(), &draft)
        .await
        .expect("create trip");
    world.last_trip = Some(created);
}

#[when("the driver starts the trip")]
async fn when_start_trip(world: &mut AppWorld) {
    world.run_action(TripAction::Start, ActionData::default()).await;
}

#[when(regex = r"^the driver pauses the trip with reason (\d+)$")]
async fn when_pause_trip(world: &mut AppWorld, reason: i64) {
    let data = ActionData {
        reason_id: Some(reason),
        ..ActionData::default()
    };
    world.run_action(TripAction::Pause, data).await;
}

#[when(regex = r#"^the driver pauses the trip noting \"([^\"]+)\"$"#)]
async fn when_pause_with_notes(world: &mut AppWorld, notes: String) {
    let data = ActionData {
        notes: Some(notes),
        ..ActionData::default()
    };
    world.run_action(TripAction::Pause, data).await;
}

#[then(regex = r#"^the trip notes say \"([^\"]+)\"$"#)]
async fn then_trip_notes(world: &mut AppWorld, expected: String) {
    let id = world.trip_id();
    let trip = world
        .dispatch()
        .backend()
        .get_trip(&token(), id)
        .await
        .expect("trip lookup");
    assert_eq!(trip.comments.as_deref(), Some(expected.as_str()));
}

#[when("the driver resumes the trip")]
async fn when_resume_trip(world: &mut AppWorld) {
    world.run_action(TripAction::Resume, ActionData::default()).await;
}

#[when("the driver completes the trip")]
async fn when_complete_trip(world: &mut AppWorld) {
    world.run_action(TripAction::Done, ActionData::default()).await;
}

#[when("the driver tries to cancel the trip")]
async fn when_try_cancel(world: &mut AppWorld) {
    world.run_action(TripAction::Cancel, ActionData::default()).await;
}

#[then(regex = r#"^the trip is (draft|active|paused|done|cancelled)$"#)]
async fn then_trip_state(world: &mut AppWorld, expected: String) {
    let id = world.trip_id();
    let trip = world
        .dispatch()
        .backend()
        .get_trip(&token(), id)
        .await
        .expect("trip lookup");
    assert_eq!(trip.state.as_str(), expected);
}

#[then("the action is rejected as an invalid transition")]
async fn then_invalid_transition(world: &mut AppWorld) {
    assert!(matches!(
        world.last_error,
        Some(AppError::InvalidTransition { .. })
    ));
}

#[then(regex = r"^the trip pause count is (\d+)$")]
async fn then_pause_count(world: &mut AppWorld, expected: u32) {
    let id = world.trip_id();
    let trip = world
        .dispatch()
        .backend()
        .get_trip(&token(), id)
        .await
        .expect("trip lookup");
    assert_eq!(trip.pause_count, expected);
}

#[when(regex = r"^the driver starts a client search of (\d+) minutes$")]
async fn when_start_search(world: &mut AppWorld, minutes: u32) {
    world.start_search(minutes).await;
}

#[then("the search is accepted and searching")]
async fn then_search_searching(world: &mut AppWorld) {
    assert!(world.last_error.is_none(), "{:?}", world.last_error);
    let search = world.last_search.as_ref().expect("a search must exist");
    assert_eq!(search.state, SearchState::Searching);
    assert!(search.is_active(Utc::now()));
}

#[then("the search is rejected for a too short window")]
async fn then_search_too_short(world: &mut AppWorld) {
    assert!(matches!(
        world.last_error,
        Some(AppError::Validation {
            field: Some("wait_limit_minutes"),
            ..
        })
    ));
}

#[then(regex = r#"^the request conflicts with search \"([^\"]+)\"$"#)]
async fn then_conflict(world: &mut AppWorld, name: String) {
    match &world.last_error {
        Some(AppError::Conflict { existing }) => assert_eq!(existing.search_number, name),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[when(regex = r"^the driver replaces the search with a (\d+) minute window$")]
async fn when_replace_search(world: &mut AppWorld, minutes: u32) {
    let request = EmptyTripRequest {
        wait_limit_minutes: minutes,
        comments: None,
    };
    let result = world
        .dispatch()
        .replace_empty_trip(&token(), &request)
        .await;
    match result {
        Ok(created) => {
            world.last_search = Some(created);
            world.last_error = None;
        }
        Err(err) => world.last_error = Some(err),
    }
}

#[then(regex = r#"^search \"([^\"]+)\" is (searching|converted|cancelled)$"#)]
async fn then_search_state(world: &mut AppWorld, name: String, expected: String) {
    let page = world
        .dispatch()
        .list_empty_trips(&token(), 1, 50)
        .await
        .expect("search list");
    let search = page
        .data
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("search {name} not found"));
    assert_eq!(search.state.as_str(), expected);
}

#[then(regex = r"^the active search window is (\d+) minutes$")]
async fn then_search_window(world: &mut AppWorld, expected: u32) {
    let active = world
        .dispatch()
        .active_search(&token())
        .await
        .expect("active search lookup")
        .expect("an active search must exist");
    assert_eq!(active.wait_limit_minutes, expected);
}

#[when("the search deadline passes")]
async fn when_deadline_passes(world: &mut AppWorld) {
    let id = world.last_search.as_ref().expect("a search must exist").id;
    let state = world
        .state
        .as_ref()
        .expect("session must be connected first");
    let mut mock = state.mock.state.lock().unwrap();
    let search = mock
        .searches
        .iter_mut()
        .find(|s| s.id == id)
        .expect("search present in backend");
    search.wait_limit_time = Some(Utc::now() - Duration::minutes(5));
}

#[then("the search is expired")]
async fn then_search_expired(world: &mut AppWorld) {
    let id = world.last_search.as_ref().expect("a search must exist").id;
    let page = world
        .dispatch()
        .list_empty_trips(&token(), 1, 50)
        .await
        .expect("search list");
    let search = page
        .data
        .iter()
        .find(|s| s.id == id)
        .expect("search present");
    assert!(search.is_expired(Utc::now()));
    assert!(!search.is_active(Utc::now()));
}

#[when("the driver converts the active search")]
async fn when_convert_search(world: &mut AppWorld) {
    let id = world.last_search.as_ref().expect("a search must exist").id;
    let result = world.dispatch().convert_empty_trip(&token(), id).await;
    match result {
        Ok(converted) => {
            world.last_trip = Some(TripStub {
                id: converted.trip_id,
                name: converted.trip_name.unwrap_or_default(),
                state: TripState::Draft,
            });
            world.last_error = None;
        }
        Err(err) => world.last_error = Some(err),
    }
}

#[then("the conversion yields a draft trip")]
async fn then_conversion_yields_trip(world: &mut AppWorld) {
    assert!(world.last_error.is_none(), "{:?}", world.last_error);
    let id = world.trip_id();
    let trip = world
        .dispatch()
        .backend()
        .get_trip(&token(), id)
        .await
        .expect("trip lookup");
    assert_eq!(trip.state, TripState::Draft);
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
