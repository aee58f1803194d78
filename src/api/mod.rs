use rocket::Route;

mod candidate;
mod election;
mod eligibility;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(eligibility::routes());
    routes.extend(election::routes());
    routes.extend(candidate::routes());
    routes.extend(voting::routes());
    routes
}
