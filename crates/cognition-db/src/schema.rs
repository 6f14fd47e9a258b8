//! The `cognition` schema: tenant and user tables, membership functions,
//! the tenant group roles and their row-level security policies.

use tracing::info;

use crate::client::{DatabaseClient, QueryOptions};
use crate::error::DbError;

const SCHEMA: &str = r#"
CREATE SCHEMA IF NOT EXISTS cognition;
CREATE EXTENSION IF NOT EXISTS "uuid-ossp" WITH SCHEMA public;
"#;

const CREATE_ROLE_FUNCTION: &str = r#"
CREATE OR REPLACE FUNCTION cognition.createrole(_groupname NAME, _ingroup NAME DEFAULT NULL, _pass TEXT DEFAULT NULL)
    RETURNS void AS $$
    BEGIN
        IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = _groupname) THEN
            IF _pass IS NOT NULL THEN
                EXECUTE format('CREATE ROLE %I WITH LOGIN PASSWORD %L', _groupname, _pass);
            ELSE
                EXECUTE format('CREATE ROLE %I', _groupname);
            END IF;
            IF _ingroup IS NOT NULL THEN
                EXECUTE format('GRANT %I TO %I', _ingroup, _groupname);
            END IF;
            RAISE NOTICE 'role % created', _groupname;
        ELSE
            RAISE NOTICE 'role % already exists, skipping', _groupname;
        END IF;
    END;
$$ LANGUAGE plpgsql VOLATILE;
"#;

const TENANTS_TABLE: &str = r#"
CREATE TABLE cognition.tenants
(
    id uuid PRIMARY KEY DEFAULT public.uuid_generate_v4() NOT NULL,
    name CHARACTER VARYING UNIQUE NOT NULL,
    displayname CHARACTER VARYING NOT NULL
);
ALTER TABLE cognition.tenants ENABLE ROW LEVEL SECURITY;
INSERT INTO cognition.tenants (name, displayname) VALUES ('application_owner', 'Super Admin');
"#;

const USERS_TABLE: &str = r#"
CREATE TABLE cognition.users
(
    id VARCHAR(31) PRIMARY KEY,
    email CHARACTER VARYING UNIQUE,
    first_name CHARACTER VARYING,
    last_name CHARACTER VARYING,
    user_preferences JSONB DEFAULT '[]',
    status VARCHAR(30) DEFAULT NULL,
    expires_at timestamp,
    invitation_data JSONB,
    tenant_id uuid REFERENCES cognition.tenants (id) ON DELETE CASCADE
);
CREATE INDEX users_user_preferences_gin_idx ON cognition.users USING gin(user_preferences);
ALTER TABLE cognition.users ENABLE ROW LEVEL SECURITY;
"#;

const MEMBERSHIP_FUNCTIONS: &str = r#"
CREATE OR REPLACE FUNCTION cognition.gettenants(username text)
    RETURNS SETOF text AS $$
        SELECT regexp_replace(r.rolname, '(_admin(s)?|_user(s)?)$', '')
        FROM pg_roles u
        JOIN pg_auth_members m ON u.oid = m.member
        JOIN pg_roles r ON r.oid = m.roleid
        WHERE u.rolname = username;
$$ LANGUAGE sql STABLE;

-- Empty for users without a login role yet.
CREATE OR REPLACE FUNCTION cognition.groupsof(username text)
    RETURNS SETOF text AS $$
        SELECT a.rolname::text FROM pg_roles u
        JOIN pg_roles a ON pg_has_role(u.oid, a.oid, 'member')
        WHERE u.rolname = username AND a.oid <> u.oid;
$$ LANGUAGE sql STABLE;

CREATE OR REPLACE FUNCTION cognition.tenantrole(useremail text, tenant text)
    RETURNS text AS $$
        SELECT regexp_replace(g, '^.*_(admin|user)s$', '\1')
        FROM cognition.groupsof((SELECT id FROM cognition.users WHERE email = useremail)) AS g
        WHERE g LIKE tenant || '\_%'
          AND EXISTS (SELECT 1 FROM cognition.tenants WHERE name = tenant)
        ORDER BY g
        LIMIT 1;
$$ LANGUAGE sql STABLE;

CREATE OR REPLACE FUNCTION cognition.switch_role(user_email text)
    RETURNS void AS $$
    DECLARE
        u name;
    BEGIN
        u := (SELECT id FROM cognition.users t WHERE t.email = user_email);
        EXECUTE format('SET ROLE %I', u);
    END;
$$ LANGUAGE plpgsql VOLATILE;
"#;

const GRANTS: &str = r#"
SELECT cognition.createrole('application_owner', NULL, NULL);
GRANT USAGE ON SCHEMA cognition TO application_owner;
ALTER DEFAULT PRIVILEGES IN SCHEMA cognition GRANT EXECUTE ON FUNCTIONS TO application_owner;
ALTER DEFAULT PRIVILEGES IN SCHEMA cognition GRANT ALL ON TABLES TO application_owner;
GRANT ALL ON ALL TABLES IN SCHEMA cognition TO application_owner;

SELECT cognition.createrole('tenant_admins', NULL, NULL);
GRANT USAGE ON SCHEMA cognition TO tenant_admins;
GRANT SELECT, INSERT, DELETE, UPDATE ON TABLE cognition.users TO tenant_admins;
GRANT SELECT, UPDATE (displayname) ON TABLE cognition.tenants TO tenant_admins;

SELECT cognition.createrole('tenant_users', NULL, NULL);
GRANT USAGE ON SCHEMA cognition TO tenant_users;
GRANT UPDATE (first_name, last_name, user_preferences) ON TABLE cognition.users TO tenant_users;
GRANT SELECT ON TABLE cognition.users TO tenant_users;
GRANT SELECT ON TABLE cognition.tenants TO tenant_users;

GRANT EXECUTE ON FUNCTION cognition.gettenants(text) TO tenant_admins, tenant_users, application_owner;
GRANT EXECUTE ON FUNCTION cognition.groupsof(text) TO tenant_admins, tenant_users, application_owner;
GRANT EXECUTE ON FUNCTION cognition.tenantrole(text, text) TO tenant_admins, tenant_users, application_owner;
"#;

const TENANT_TEMPLATE: &str = r#"
DROP SCHEMA IF EXISTS tenant_template CASCADE;
CREATE SCHEMA tenant_template;
GRANT USAGE ON SCHEMA tenant_template TO application_owner;
ALTER DEFAULT PRIVILEGES IN SCHEMA tenant_template GRANT ALL PRIVILEGES ON TABLES TO application_owner;
"#;

const POLICIES: &str = r#"
CREATE POLICY application_owner_users ON cognition.users
    FOR ALL TO application_owner
    USING (true) WITH CHECK (true);

CREATE POLICY application_owner_tenants ON cognition.tenants
    FOR ALL TO application_owner
    USING (true) WITH CHECK (true);

CREATE POLICY users_user_select ON cognition.users
    FOR SELECT TO tenant_users
    USING (id = current_user AND status = 'active');

CREATE POLICY users_user_update ON cognition.users
    FOR UPDATE TO tenant_users
    USING (id = current_user AND status = 'active');

CREATE POLICY users_tenants_select ON cognition.tenants
    FOR SELECT TO tenant_users
    USING (name IN (SELECT cognition.gettenants(current_user::text)));

CREATE POLICY admins_users_all ON cognition.users
    FOR ALL TO tenant_admins
    USING (tenant_id IN (SELECT id FROM cognition.tenants));

CREATE POLICY admins_tenants_select ON cognition.tenants
    FOR SELECT TO tenant_admins
    USING (name IN (SELECT cognition.gettenants(current_user::text)));

CREATE POLICY admins_tenants_update ON cognition.tenants
    FOR UPDATE TO tenant_admins
    USING (name IN (SELECT cognition.gettenants(current_user::text)))
    WITH CHECK (name IN (SELECT cognition.gettenants(current_user::text)));
"#;

const REMOVE: &str = r#"
DROP SCHEMA IF EXISTS tenant_template CASCADE;
DROP SCHEMA IF EXISTS cognition CASCADE;
DROP ROLE IF EXISTS tenant_users;
DROP ROLE IF EXISTS tenant_admins;
DROP ROLE IF EXISTS application_owner;
"#;

/// Install steps in dependency order.
const INSTALL: &[(&str, &str)] = &[
    ("schema", SCHEMA),
    ("createrole", CREATE_ROLE_FUNCTION),
    ("tenants", TENANTS_TABLE),
    ("users", USERS_TABLE),
    ("functions", MEMBERSHIP_FUNCTIONS),
    ("grants", GRANTS),
    ("tenant_template", TENANT_TEMPLATE),
    ("policies", POLICIES),
];

/// Installs and removes the `cognition` schema. Needs a login allowed to
/// create schemas and roles.
pub struct SchemaBuilder<'a> {
    client: &'a DatabaseClient,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(client: &'a DatabaseClient) -> Self {
        Self { client }
    }

    pub async fn create_cognition_schema(&self) -> Result<(), DbError> {
        for (step, sql) in INSTALL {
            self.client
                .run_query(sql, QueryOptions::new().script())
                .await?;
            info!(step, "cognition schema step applied");
        }
        info!("cognition schema installed");
        Ok(())
    }

    /// Drop the schema, its policies and the global tenant groups. Tenant
    /// schemas and per-tenant groups are left in place.
    pub async fn remove_cognition_schema(&self) -> Result<(), DbError> {
        self.client
            .run_query(REMOVE, QueryOptions::new().script())
            .await?;
        info!("cognition schema removed");
        Ok(())
    }
}
